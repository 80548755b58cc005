//! Response framing.
//!
//! The listener writes a single JSON object per reply with no length prefix
//! and no terminator. The client decides when a reply is complete by asking a
//! [`FrameDetector`] after every read.

/// Decides whether the bytes buffered so far form one complete response.
pub trait FrameDetector: Send + Sync {
    fn is_complete(&self, buf: &[u8]) -> bool;

    fn name(&self) -> &'static str;
}

/// Complete when the whitespace-trimmed buffer ends with `}`.
///
/// This is what the listener expects. It misfires when a string value ends
/// in `}` at a read boundary; use [`BalancedJson`] where that matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingBrace;

impl FrameDetector for TrailingBrace {
    fn is_complete(&self, buf: &[u8]) -> bool {
        buf.iter()
            .rev()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'}')
    }

    fn name(&self) -> &'static str {
        "trailing-brace"
    }
}

/// Complete when the first top-level object's braces balance, ignoring
/// braces inside string literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedJson;

impl FrameDetector for BalancedJson {
    fn is_complete(&self, buf: &[u8]) -> bool {
        let mut depth: usize = 0;
        let mut started = false;
        let mut in_string = false;
        let mut escaped = false;

        for &b in buf {
            if in_string {
                match (escaped, b) {
                    (true, _) => escaped = false,
                    (false, b'\\') => escaped = true,
                    (false, b'"') => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' if started => in_string = true,
                b'{' => {
                    started = true;
                    depth += 1;
                }
                b'}' if started => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    fn name(&self) -> &'static str {
        "balanced-json"
    }
}
