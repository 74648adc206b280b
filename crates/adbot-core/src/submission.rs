//! Submission validation against an offer's limits.

use crate::domain::Offer;

/// Content ready to be staged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub text: String,
    pub photos: Vec<String>,
    /// Photos received before truncation, when more than the offer allows.
    pub dropped_from: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("submission has neither text nor photos")]
    Empty,
    #[error("text has {actual} characters, limit is {max}")]
    TextTooLong { max: usize, actual: usize },
}

/// Apply the offer's limits. Text length is counted in characters; extra photos
/// are truncated to the first `max_photos`.
pub fn validate(
    offer: &Offer,
    text: Option<String>,
    mut photos: Vec<String>,
) -> Result<Submission, SubmissionError> {
    let text = text.map(|t| t.trim().to_string()).unwrap_or_default();
    if text.is_empty() && photos.is_empty() {
        return Err(SubmissionError::Empty);
    }

    let actual = text.chars().count();
    if actual > offer.max_text_len {
        return Err(SubmissionError::TextTooLong {
            max: offer.max_text_len,
            actual,
        });
    }

    let dropped_from = if photos.len() > offer.max_photos {
        let received = photos.len();
        photos.truncate(offer.max_photos);
        Some(received)
    } else {
        None
    };

    Ok(Submission {
        text,
        photos,
        dropped_from,
    })
}
