//! Discrete rating parsing, the shared retry-then-neutral policy used by
//! every strategy that asks the model for a single digit, and the
//! retry-once policy for free-text stages.

use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{Backend, GenerateRequest};
use crate::error::BackendError;
use crate::ssr::{LikertPmf, Rating};

pub const RETRY_TEMPERATURE: f32 = 0.1;
pub const RETRY_MAX_TOKENS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatingParseError {
    #[error("empty rating response")]
    Empty,

    #[error("no rating 1-5 at start of response: {0:?}")]
    NoRating(String),
}

/// Accepts a response whose first non-blank character is a digit 1..=5.
pub fn parse_rating(response: &str) -> Result<Rating, RatingParseError> {
    let trimmed = response.trim();
    let first = trimmed.chars().next().ok_or(RatingParseError::Empty)?;
    first
        .to_digit(10)
        .and_then(|d| Rating::new(d as u8))
        .ok_or_else(|| RatingParseError::NoRating(trimmed.chars().take(40).collect()))
}

/// One-hot PMF at the parsed rating.
pub fn parse_dlr_response(response: &str) -> Result<LikertPmf, RatingParseError> {
    parse_rating(response).map(LikertPmf::one_hot)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingOutcome {
    pub rating: Rating,
    pub raw: String,
    /// Both attempts were unparseable and the neutral rating was used.
    pub fell_back: bool,
}

/// Issues `request`; on an unparseable answer retries once with
/// `retry_suffix` appended at a tighter budget, then falls back to
/// [`Rating::NEUTRAL`]. Backend errors are propagated untouched.
pub async fn rate_with_retry(
    backend: &dyn Backend,
    request: GenerateRequest,
    retry_suffix: &str,
) -> Result<RatingOutcome, BackendError> {
    let first = backend.generate_text(&request).await?;
    let err = match parse_rating(&first.text) {
        Ok(rating) => {
            return Ok(RatingOutcome {
                rating,
                raw: first.text,
                fell_back: false,
            })
        }
        Err(e) => e,
    };
    debug!("Rating parse failed ({}), retrying with correction", err);

    let mut retry = request;
    retry.user.push_str(retry_suffix);
    retry.temperature = Some(RETRY_TEMPERATURE);
    retry.max_tokens = Some(RETRY_MAX_TOKENS);

    let second = backend.generate_text(&retry).await?;
    match parse_rating(&second.text) {
        Ok(rating) => Ok(RatingOutcome {
            rating,
            raw: second.text,
            fell_back: false,
        }),
        Err(e) => {
            warn!("Rating retry also invalid ({}); using neutral rating", e);
            Ok(RatingOutcome {
                rating: Rating::NEUTRAL,
                raw: first.text,
                fell_back: true,
            })
        }
    }
}

/// Issues a free-text `request`, asking once more when the answer is blank.
/// A second blank answer fails the sample with
/// [`BackendError::EmptyContent`] so it is left out of aggregation.
pub async fn generate_text_with_retry(
    backend: &dyn Backend,
    request: &GenerateRequest,
    stage: &'static str,
) -> Result<String, BackendError> {
    for attempt in 0..2 {
        let text = backend.generate_text(request).await?.text;
        if !text.trim().is_empty() {
            return Ok(text);
        }
        debug!("Empty {} response (attempt {})", stage, attempt + 1);
    }
    warn!("Empty {} response after retry; dropping sample", stage);
    Err(BackendError::EmptyContent(stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_leading_digit() {
        assert_eq!(parse_rating("4").unwrap().value(), 4);
        assert_eq!(parse_rating("  5\n").unwrap().value(), 5);
        assert_eq!(parse_rating("2 - probably not").unwrap().value(), 2);
        assert_eq!(parse_rating("12").unwrap().value(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_rating(""), Err(RatingParseError::Empty));
        assert_eq!(parse_rating("   "), Err(RatingParseError::Empty));
        assert!(parse_rating("banana").is_err());
        assert!(parse_rating("7").is_err());
        assert!(parse_rating("0").is_err());
        assert!(parse_rating("Rating: 4").is_err());
    }

    #[test]
    fn test_dlr_response_is_one_hot() {
        for r in 1..=5u8 {
            let pmf = parse_dlr_response(&r.to_string()).unwrap();
            for (i, p) in pmf.probabilities().iter().enumerate() {
                let expected = if i == (r - 1) as usize { 1.0 } else { 0.0 };
                assert_eq!(*p, expected);
            }
        }
        assert!(parse_dlr_response("banana").is_err());
    }
}
