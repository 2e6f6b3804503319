//! Perturbation-based saliency.
//!
//! For a cursor position, the baseline next-token distribution is compared
//! against the distribution obtained after deleting each nearby identifier:
//!
//! ```text
//! saliency(token) = KL(baseline ‖ prefix-without-token)
//! ```
//!
//! One analysis costs `candidates + 1` backend calls, which is why saliency
//! runs on a long debounce window and a long cache TTL.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analytics::metrics::{entropy, kl_divergence};
use crate::analytics::probability::normalize;
use crate::backend::types::{SaliencyRequest, SaliencyResponse, SalientToken};
use crate::backend::{BackendError, LogprobSource};

/// Saliency tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaliencyConfig {
    /// Lines scanned for candidates: the cursor line and the ones above it.
    pub window_lines: usize,

    /// Maximum number of perturbations (backend calls) per analysis.
    pub max_candidates: usize,

    /// Identifiers shorter than this are not perturbed.
    pub min_token_chars: usize,

    /// Scores at or below this KL (nats) are dropped.
    pub min_kl: f64,

    /// Maximum number of tokens reported.
    pub top_n: usize,

    /// Pause between perturbation calls, for rate-limited upstreams.
    pub request_spacing_ms: u64,
}

impl Default for SaliencyConfig {
    fn default() -> Self {
        Self {
            window_lines: 5,
            max_candidates: 10,
            min_token_chars: 2,
            min_kl: 0.001,
            top_n: 10,
            request_spacing_ms: 0,
        }
    }
}

/// An identifier that may be removed to probe its influence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// 1-indexed line.
    pub line: usize,
    /// 0-indexed character offset.
    pub character: usize,
    pub text: String,
}

fn char_prefix(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

/// Text before the cursor. Lines are 1-indexed, characters 0-indexed.
///
/// A line before the start yields an empty prefix; a line past the end
/// yields the whole text.
pub fn prefix_at(code: &str, cursor_line: usize, cursor_char: usize) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    prefix_of_lines(&lines, cursor_line, cursor_char)
}

fn prefix_of_lines<S: AsRef<str>>(lines: &[S], cursor_line: usize, cursor_char: usize) -> String {
    if cursor_line < 1 {
        return String::new();
    }
    if cursor_line > lines.len() {
        return lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
    }

    let mut parts: Vec<&str> = lines[..cursor_line - 1].iter().map(AsRef::as_ref).collect();
    parts.push(char_prefix(lines[cursor_line - 1].as_ref(), cursor_char));
    parts.join("\n")
}

/// Identifier runs `[A-Za-z_][A-Za-z0-9_]*` in `line`, as (char offset, text).
fn identifiers(line: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut run: Option<(usize, String)> = None;

    for (idx, c) in line.chars().chain(std::iter::once(' ')).enumerate() {
        if c.is_alphanumeric() || c == '_' {
            run.get_or_insert_with(|| (idx, String::new())).1.push(c);
            continue;
        }
        if let Some((start, text)) = run.take() {
            let leading_ok = text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_');
            if leading_ok && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                out.push((start, text));
            }
        }
    }
    out
}

/// Candidate identifiers preceding the cursor, nearest first.
pub fn candidates(
    code: &str,
    cursor_line: usize,
    cursor_char: usize,
    config: &SaliencyConfig,
) -> Vec<Candidate> {
    let lines: Vec<&str> = code.split('\n').collect();
    if cursor_line < 1 || lines.is_empty() {
        return Vec::new();
    }

    // Past the end: treat the cursor as sitting at the end of the text.
    let (cursor_line, cursor_char) = if cursor_line > lines.len() {
        let last = lines.len();
        (last, lines[last - 1].chars().count())
    } else {
        (cursor_line, cursor_char)
    };

    let first = cursor_line.saturating_sub(config.window_lines.max(1) - 1).max(1);
    let mut found = Vec::new();

    for line_no in first..=cursor_line {
        for (character, text) in identifiers(lines[line_no - 1]) {
            let len = text.chars().count();
            if len < config.min_token_chars {
                continue;
            }
            if line_no == cursor_line && character + len > cursor_char {
                continue;
            }
            found.push(Candidate {
                line: line_no,
                character,
                text,
            });
        }
    }

    found.sort_by_key(|c| {
        let line_dist = cursor_line - c.line;
        let char_dist = if line_dist == 0 {
            cursor_char.abs_diff(c.character)
        } else {
            0
        };
        (line_dist, char_dist)
    });
    found.truncate(config.max_candidates);
    found
}

/// The prefix at the cursor after deleting `candidate` from the text.
pub fn perturbed_prefix(code: &str, candidate: &Candidate, cursor_line: usize, cursor_char: usize) -> String {
    let mut lines: Vec<String> = code.split('\n').map(str::to_string).collect();
    let len = candidate.text.chars().count();

    // Lines are 1-indexed; a line-0 candidate matches nothing.
    if let Some(line) = candidate.line.checked_sub(1).and_then(|i| lines.get_mut(i)) {
        let kept: String = line
            .chars()
            .enumerate()
            .filter(|(i, _)| *i < candidate.character || *i >= candidate.character + len)
            .map(|(_, c)| c)
            .collect();
        *line = kept;
    }

    let cursor_char = if candidate.line == cursor_line {
        cursor_char.saturating_sub(len)
    } else {
        cursor_char
    };
    prefix_of_lines(&lines, cursor_line, cursor_char)
}

/// Keep tokens above `min_kl`, highest first, at most `top_n`.
pub fn rank_by_kl(mut scored: Vec<SalientToken>, min_kl: f64, top_n: usize) -> Vec<SalientToken> {
    scored.retain(|t| t.kl_divergence > min_kl);
    scored.sort_by(|a, b| {
        b.kl_divergence
            .partial_cmp(&a.kl_divergence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_n);
    scored
}

/// Run a full saliency analysis against `source`.
///
/// A failed or empty baseline is [`BackendError::NoData`] or the underlying
/// error; failed perturbations are skipped.
pub async fn analyze(
    source: &dyn LogprobSource,
    request: &SaliencyRequest,
    config: &SaliencyConfig,
) -> Result<SaliencyResponse, BackendError> {
    let cursor_line = request.cursor_line as usize;
    let cursor_char = request.cursor_char as usize;

    let prefix = prefix_at(&request.code, cursor_line, cursor_char);
    let baseline_top = source.top_logprobs(&prefix).await?;
    if baseline_top.is_empty() {
        return Err(BackendError::NoData);
    }
    let baseline = normalize(&baseline_top);

    let probes = candidates(&request.code, cursor_line, cursor_char, config);
    let spacing = Duration::from_millis(config.request_spacing_ms);
    let mut scored = Vec::with_capacity(probes.len());

    for (i, candidate) in probes.iter().enumerate() {
        if i > 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }

        let perturbed = perturbed_prefix(&request.code, candidate, cursor_line, cursor_char);
        let perturbed_top = match source.top_logprobs(&perturbed).await {
            Ok(top) if !top.is_empty() => top,
            Ok(_) => continue,
            Err(e) => {
                debug!(token = %candidate.text, line = candidate.line, error = %e, "Perturbation skipped");
                continue;
            }
        };

        let kl = kl_divergence(&baseline, &normalize(&perturbed_top));
        scored.push(SalientToken {
            line: candidate.line as u32,
            character: candidate.character as u32,
            kl_divergence: kl,
            token_text: candidate.text.clone(),
        });
    }

    let tokens = rank_by_kl(scored, config.min_kl, config.top_n);
    debug!(
        probes = probes.len(),
        reported = tokens.len(),
        "Saliency analysis complete"
    );

    Ok(SaliencyResponse {
        tokens,
        base_entropy: entropy(&baseline),
    })
}
