//! Rating arithmetic for IPCR forms.
//!
//! Pure functions only: no store access, no clock. Finalization calls
//! [`score_form`] once and persists the result.

use serde::Serialize;
use uuid::Uuid;

use super::types::{AdjectivalRating, Indicator};

pub const SCORE_MIN: i32 = 1;
pub const SCORE_MAX: i32 = 5;

/// Decimal places kept for per-indicator averages.
pub const INDICATOR_AVERAGE_PLACES: u32 = 2;
/// Decimal places kept for the form grand average.
pub const GRAND_AVERAGE_PLACES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingBand {
    pub floor: f64,
    pub rating: AdjectivalRating,
}

/// Lower bound of every adjectival band, highest first. The last band
/// catches everything below the previous floor.
pub const ADJECTIVAL_BANDS: [RatingBand; 5] = [
    RatingBand {
        floor: 4.5,
        rating: AdjectivalRating::Outstanding,
    },
    RatingBand {
        floor: 3.5,
        rating: AdjectivalRating::VerySatisfactory,
    },
    RatingBand {
        floor: 2.5,
        rating: AdjectivalRating::Satisfactory,
    },
    RatingBand {
        floor: 1.5,
        rating: AdjectivalRating::Unsatisfactory,
    },
    RatingBand {
        floor: f64::NEG_INFINITY,
        rating: AdjectivalRating::Poor,
    },
];

pub fn is_valid_score(score: i32) -> bool {
    (SCORE_MIN..=SCORE_MAX).contains(&score)
}

pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

pub fn average_score(
    quantity: Option<i32>,
    quality: Option<i32>,
    timeliness: Option<i32>,
) -> Option<f64> {
    let (q, e, t) = (quantity?, quality?, timeliness?);
    let sum: i32 = [q, e, t]
        .into_iter()
        .map(|s| s.clamp(SCORE_MIN, SCORE_MAX))
        .sum();
    Some(round_to(f64::from(sum) / 3.0, INDICATOR_AVERAGE_PLACES))
}

pub fn indicator_average(indicator: &Indicator) -> Option<f64> {
    average_score(
        indicator.quantity_score,
        indicator.quality_score,
        indicator.timeliness_score,
    )
}

/// Equally weighted mean of indicator averages. `None` for an empty set.
pub fn grand_average<I>(averages: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = averages
        .into_iter()
        .fold((0.0, 0u32), |(sum, count), avg| (sum + avg, count + 1));
    if count == 0 {
        return None;
    }
    Some(round_to(sum / f64::from(count), GRAND_AVERAGE_PLACES))
}

pub fn adjectival_rating(grand_average: f64) -> AdjectivalRating {
    ADJECTIVAL_BANDS
        .iter()
        .find(|band| grand_average >= band.floor)
        .map_or(AdjectivalRating::Poor, |band| band.rating)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorScore {
    pub indicator_id: Uuid,
    pub average_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormScore {
    pub indicators: Vec<IndicatorScore>,
    pub grand_average: f64,
    pub adjectival_rating: AdjectivalRating,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    #[error("form has no indicators")]
    NoIndicators,
    #[error("{} indicator(s) are missing quantity, quality or timeliness scores", .0.len())]
    IncompleteScores(Vec<Uuid>),
    #[error("indicator {0} has a score outside 1-5")]
    OutOfRange(Uuid),
}

/// Scores a complete form. Every indicator must carry all three scores
/// within range.
pub fn score_form(indicators: &[Indicator]) -> Result<FormScore, ScoringError> {
    if indicators.is_empty() {
        return Err(ScoringError::NoIndicators);
    }

    let incomplete: Vec<Uuid> = indicators
        .iter()
        .filter(|i| !i.has_all_scores())
        .map(|i| i.id)
        .collect();
    if !incomplete.is_empty() {
        return Err(ScoringError::IncompleteScores(incomplete));
    }

    let mut scores = Vec::with_capacity(indicators.len());
    for indicator in indicators {
        let components = [
            indicator.quantity_score,
            indicator.quality_score,
            indicator.timeliness_score,
        ];
        if components.iter().flatten().any(|s| !is_valid_score(*s)) {
            return Err(ScoringError::OutOfRange(indicator.id));
        }
        let average_score = indicator_average(indicator)
            .ok_or_else(|| ScoringError::IncompleteScores(vec![indicator.id]))?;
        scores.push(IndicatorScore {
            indicator_id: indicator.id,
            average_score,
        });
    }

    let grand_average =
        grand_average(scores.iter().map(|s| s.average_score)).ok_or(ScoringError::NoIndicators)?;

    Ok(FormScore {
        indicators: scores,
        grand_average,
        adjectival_rating: adjectival_rating(grand_average),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcr::types::IndicatorCategory;
    use chrono::Utc;

    fn indicator(q: Option<i32>, e: Option<i32>, t: Option<i32>) -> Indicator {
        let now = Utc::now();
        Indicator {
            id: Uuid::new_v4(),
            form_id: Uuid::nil(),
            category: IndicatorCategory::Core,
            description: "Target".into(),
            indicator: "Measure".into(),
            actual_accomplishment: None,
            quantity_score: q,
            quality_score: e,
            timeliness_score: t,
            average_score: average_score(q, e, t),
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_average_rounds_to_two_places() {
        assert_eq!(average_score(Some(5), Some(5), Some(4)), Some(4.67));
        assert_eq!(average_score(Some(3), Some(4), Some(3)), Some(3.33));
        assert_eq!(average_score(Some(5), Some(5), Some(5)), Some(5.0));
        assert_eq!(average_score(Some(1), Some(1), Some(2)), Some(1.33));
    }

    #[test]
    fn test_average_requires_all_components() {
        assert_eq!(average_score(Some(5), None, Some(4)), None);
        assert_eq!(average_score(None, None, None), None);
    }

    #[test]
    fn test_average_clamps_components() {
        assert_eq!(average_score(Some(9), Some(5), Some(5)), Some(5.0));
        assert_eq!(average_score(Some(0), Some(-3), Some(1)), Some(1.0));
    }

    #[test]
    fn test_extreme_components_clamp_before_summing() {
        assert_eq!(average_score(Some(i32::MAX), Some(i32::MAX), Some(i32::MAX)), Some(5.0));
        assert_eq!(average_score(Some(i32::MIN), Some(i32::MIN), Some(3)), Some(1.67));
    }

    #[test]
    fn test_average_always_within_bounds() {
        for q in 1..=5 {
            for e in 1..=5 {
                for t in 1..=5 {
                    let avg = average_score(Some(q), Some(e), Some(t)).unwrap();
                    assert!((1.0..=5.0).contains(&avg), "{q},{e},{t} -> {avg}");
                    let expected = round_to(f64::from(q + e + t) / 3.0, 2);
                    assert_eq!(avg, expected);
                }
            }
        }
    }

    #[test]
    fn test_grand_average_is_equally_weighted() {
        assert_eq!(grand_average([4.67, 3.33, 5.0]), Some(4.333));
        assert_eq!(grand_average([2.0, 4.0]), Some(3.0));
        assert_eq!(grand_average(Vec::<f64>::new()), None);
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(adjectival_rating(5.0), AdjectivalRating::Outstanding);
        assert_eq!(adjectival_rating(4.5), AdjectivalRating::Outstanding);
        assert_eq!(adjectival_rating(4.499), AdjectivalRating::VerySatisfactory);
        assert_eq!(adjectival_rating(3.5), AdjectivalRating::VerySatisfactory);
        assert_eq!(adjectival_rating(3.499), AdjectivalRating::Satisfactory);
        assert_eq!(adjectival_rating(2.5), AdjectivalRating::Satisfactory);
        assert_eq!(adjectival_rating(2.0), AdjectivalRating::Unsatisfactory);
        assert_eq!(adjectival_rating(1.5), AdjectivalRating::Unsatisfactory);
        assert_eq!(adjectival_rating(1.0), AdjectivalRating::Poor);
    }

    #[test]
    fn test_bands_are_contiguous_and_decreasing() {
        for pair in ADJECTIVAL_BANDS.windows(2) {
            assert!(pair[0].floor > pair[1].floor);
        }
    }

    #[test]
    fn test_score_form_reference_scenario() {
        let indicators = vec![
            indicator(Some(5), Some(5), Some(4)),
            indicator(Some(3), Some(4), Some(3)),
            indicator(Some(5), Some(5), Some(5)),
        ];
        let score = score_form(&indicators).unwrap();
        let averages: Vec<f64> = score.indicators.iter().map(|s| s.average_score).collect();
        assert_eq!(averages, vec![4.67, 3.33, 5.0]);
        assert_eq!(score.grand_average, 4.333);
        assert_eq!(round_to(score.grand_average, 2), 4.33);
        assert_eq!(score.adjectival_rating, AdjectivalRating::VerySatisfactory);
    }

    #[test]
    fn test_score_form_rejects_incomplete() {
        let missing = indicator(Some(5), None, Some(4));
        let missing_id = missing.id;
        let err = score_form(&[indicator(Some(5), Some(5), Some(5)), missing]).unwrap_err();
        assert_eq!(err, ScoringError::IncompleteScores(vec![missing_id]));
        assert_eq!(score_form(&[]).unwrap_err(), ScoringError::NoIndicators);
    }

    #[test]
    fn test_score_form_rejects_out_of_range() {
        let bad = indicator(Some(6), Some(5), Some(5));
        let bad_id = bad.id;
        assert_eq!(score_form(&[bad]).unwrap_err(), ScoringError::OutOfRange(bad_id));
    }
}
