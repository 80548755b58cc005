//! Subcommand implementations. Results go to stdout as pretty JSON.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use llmbridge::{LlmClient, OpenAiCompatClient};
use meshconf::{ConfigSources, MeshConfig};
use meshproto::{check_connection, ClientConfig};
use meshwright::advisor::{AdviseOptions, WorkflowAdvisor};
use meshwright::pipeline::{
    AnimationPreset, ExportFormat, ProgressFn, ProtocolScriptExecutor, ScriptExecutor, StageRecord,
};
use meshwright::{
    Assistant, ClassifyOptions, Executor, HybridPipeline, PipelineOptions, Planner, ProviderRegistry,
    StrategyRouter, TcpConnector,
};

use crate::Commands;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render output")?
    );
    Ok(())
}

fn llm(config: &MeshConfig) -> Result<Arc<dyn LlmClient>> {
    let client = OpenAiCompatClient::from_config(&config.infra.llm)
        .context("Failed to build LLM client")?;
    Ok(Arc::new(client))
}

fn client_config(config: &MeshConfig) -> ClientConfig {
    ClientConfig::from(&config.infra.protocol)
}

pub async fn dispatch(
    command: Commands,
    config: &MeshConfig,
    sources: &ConfigSources,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Commands::Check => {
            let check = check_connection(&client_config(config)).await;
            print_json(&check)?;
            if !check.connected {
                bail!("3D application not reachable at {}", check.endpoint);
            }
        }

        Commands::Classify {
            request,
            strategy,
            keyword_only,
            scene,
        } => {
            let router = StrategyRouter::new(llm(config)?);
            let options = ClassifyOptions {
                override_strategy: strategy,
                scene_context: scene,
                keyword_only,
            };
            print_json(&router.classify(&request, &options).await)?;
        }

        Commands::Plan { request } => {
            let planner = Planner::from_config(llm(config)?, config);
            print_json(&planner.generate_plan(&request, cancel).await)?;
        }

        Commands::Run {
            request,
            strategy,
            user,
        } => {
            let llm = llm(config)?;
            let registry = Arc::new(ProviderRegistry::from_config(config));
            let scripts = Arc::new(ProtocolScriptExecutor::connect(client_config(config)));
            let assistant = Assistant::new(
                StrategyRouter::new(llm.clone()),
                Planner::from_config(llm.clone(), config),
                Executor::from_config(llm, Arc::new(TcpConnector::new(client_config(config))), config),
                registry,
            )
            .with_script_executor(scripts.clone())
            .with_pipeline_options(PipelineOptions::from_config(config));

            let options = ClassifyOptions {
                override_strategy: strategy,
                ..Default::default()
            };
            let report = assistant.fulfill(&user, &request, &options, cancel).await;
            scripts.close().await;
            print_json(&report)?;
        }

        Commands::Pipeline {
            request,
            image,
            no_degrade,
            segment,
            rig,
            animate,
            format,
            output_dir,
        } => {
            let mut options = PipelineOptions::from_config(config)
                .with_segmentation(segment)
                .with_rigging(rig);
            if no_degrade {
                options = options.with_graceful_degradation(false);
            }
            if let Some(image) = image {
                options = options.with_image(image);
            }
            if let Some(preset) = animate {
                let preset: AnimationPreset = preset.parse().map_err(|e: String| anyhow!(e))?;
                options = options.with_animation(Some(preset));
            }
            if let Some(format) = format {
                options.export_format = format.parse::<ExportFormat>().map_err(|e| anyhow!(e))?;
            }
            if let Some(dir) = output_dir {
                options = options.with_output_dir(dir);
            }

            let scripts = Arc::new(ProtocolScriptExecutor::connect(client_config(config)));
            let pipeline = HybridPipeline::new(Arc::new(ProviderRegistry::from_config(config)))
                .with_script_executor(scripts.clone() as Arc<dyn ScriptExecutor>);
            let progress: ProgressFn = &|record: &StageRecord| {
                info!(stage = %record.stage, status = ?record.status, "stage update");
            };
            let result = pipeline.run(&request, &options, Some(progress), cancel).await;
            scripts.close().await;
            print_json(&result)?;
        }

        Commands::Advise {
            request,
            strategy,
            scene,
        } => {
            let llm = llm(config)?;
            let strategy = match strategy {
                Some(s) => s,
                None => {
                    StrategyRouter::new(llm.clone())
                        .classify(&request, &ClassifyOptions::default())
                        .await
                        .strategy
                }
            };
            let advisor = WorkflowAdvisor::new(llm);
            let options = AdviseOptions {
                scene_context: scene,
            };
            print_json(&advisor.generate_workflow_proposal(&request, strategy, &options).await)?;
        }

        Commands::Providers => {
            let registry = ProviderRegistry::from_config(config);
            print_json(&registry.health().await)?;
        }

        Commands::Config => {
            print!("{}", config.to_toml());
            for file in &sources.files {
                eprintln!("# loaded {}", file.display());
            }
            for var in &sources.env_overrides {
                eprintln!("# overridden by {}", var);
            }
        }
    }
    Ok(())
}
