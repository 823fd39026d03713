use serde::Serialize;
use std::fmt;

/// Fewest non-blank answers a save accepts.
pub const MIN_ANSWERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceMode {
    Single,
    Multi,
}

impl ChoiceMode {
    pub fn from_single(single: bool) -> Self {
        if single {
            Self::Single
        } else {
            Self::Multi
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    InsufficientAnswers,
    MaxFractionNotOne,
    FractionsDoNotSumToOne,
}

/// Why a save was refused. `value` is the minimum answer count for
/// `InsufficientAnswers` and a percentage for the fraction checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationNotice {
    pub kind: NoticeKind,
    pub value: f64,
}

impl ValidationNotice {
    fn new(kind: NoticeKind, value: f64) -> Self {
        Self { kind, value }
    }
}

impl fmt::Display for ValidationNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NoticeKind::InsufficientAnswers => write!(
                f,
                "this type of question requires at least {} choices",
                self.value
            ),
            NoticeKind::MaxFractionNotOne => write!(
                f,
                "one of the choices must be worth 100% so full marks are reachable; the highest is {}%",
                self.value
            ),
            NoticeKind::FractionsDoNotSumToOne => write!(
                f,
                "the positive grades must add up to 100%; they add up to {}%",
                self.value
            ),
        }
    }
}

pub fn round_2_decimals(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn as_percent(fraction: f64) -> f64 {
    round_2_decimals(fraction * 100.0)
}

/// Checks the submitted grades against the single/multi mode.
///
/// Blank answers are ignored. Only positive fractions count towards the
/// multi-mode total, so penalty answers never affect it. That mirrors the
/// historical behaviour and may hide a data-entry mistake; it is kept as is.
pub fn validate_fractions<'a, I>(mode: ChoiceMode, answers: I) -> Result<(), ValidationNotice>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut count = 0usize;
    let mut max_fraction = -1.0_f64;
    let mut sum_fraction = 0.0_f64;
    for (text, fraction) in answers {
        if text.trim().is_empty() {
            continue;
        }
        count += 1;
        if fraction > 0.0 {
            sum_fraction += fraction;
        }
        if fraction > max_fraction {
            max_fraction = fraction;
        }
    }

    if count < MIN_ANSWERS {
        return Err(ValidationNotice::new(
            NoticeKind::InsufficientAnswers,
            MIN_ANSWERS as f64,
        ));
    }

    match mode {
        ChoiceMode::Single => {
            if round_2_decimals(max_fraction) != 1.0 {
                return Err(ValidationNotice::new(
                    NoticeKind::MaxFractionNotOne,
                    as_percent(max_fraction),
                ));
            }
        }
        ChoiceMode::Multi => {
            let total = round_2_decimals(sum_fraction);
            if total != 1.0 {
                return Err(ValidationNotice::new(
                    NoticeKind::FractionsDoNotSumToOne,
                    as_percent(total),
                ));
            }
        }
    }
    Ok(())
}

/// Expected score of a uniformly random pick. Not defined for multi mode.
pub fn random_guess_score(mode: ChoiceMode, fractions: &[f64]) -> Option<f64> {
    if mode == ChoiceMode::Multi || fractions.is_empty() {
        return None;
    }
    Some(fractions.iter().sum::<f64>() / fractions.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(fractions: &[f64]) -> Vec<(String, f64)> {
        fractions
            .iter()
            .enumerate()
            .map(|(i, f)| (format!("choice {}", i + 1), *f))
            .collect()
    }

    fn check(mode: ChoiceMode, list: &[(String, f64)]) -> Result<(), ValidationNotice> {
        validate_fractions(mode, list.iter().map(|(t, f)| (t.as_str(), *f)))
    }

    #[test]
    fn single_accepts_exact_max_of_one() {
        assert_eq!(check(ChoiceMode::Single, &answers(&[1.0, 0.5, 0.0])), Ok(()));
    }

    #[test]
    fn single_rejects_max_below_one() {
        let notice = check(ChoiceMode::Single, &answers(&[0.9, 0.5])).unwrap_err();
        assert_eq!(notice.kind, NoticeKind::MaxFractionNotOne);
        assert_eq!(notice.value, 90.0);
    }

    #[test]
    fn multi_accepts_halves() {
        assert_eq!(check(ChoiceMode::Multi, &answers(&[0.5, 0.5])), Ok(()));
    }

    #[test]
    fn multi_rejects_total_above_one() {
        let notice = check(ChoiceMode::Multi, &answers(&[0.5, 0.6])).unwrap_err();
        assert_eq!(notice.kind, NoticeKind::FractionsDoNotSumToOne);
        assert_eq!(notice.value, 110.0);
    }

    #[test]
    fn multi_total_is_rounded_to_two_decimals() {
        let thirds = answers(&[0.3333333, 0.3333333, 0.3333333]);
        assert_eq!(check(ChoiceMode::Multi, &thirds), Ok(()));
    }

    #[test]
    fn multi_ignores_negative_fractions_in_total() {
        let list = answers(&[0.5, 0.5, -1.0]);
        assert_eq!(check(ChoiceMode::Multi, &list), Ok(()));
    }

    #[test]
    fn blank_answers_do_not_count() {
        let list = vec![
            ("only one".to_string(), 1.0),
            ("   ".to_string(), 0.0),
            ("".to_string(), 0.0),
        ];
        let notice = check(ChoiceMode::Single, &list).unwrap_err();
        assert_eq!(notice.kind, NoticeKind::InsufficientAnswers);
        assert_eq!(notice.value, 2.0);
    }

    #[test]
    fn insufficient_answers_wins_over_fraction_checks() {
        let list = vec![("a".to_string(), 0.1)];
        let notice = check(ChoiceMode::Multi, &list).unwrap_err();
        assert_eq!(notice.kind, NoticeKind::InsufficientAnswers);
    }

    #[test]
    fn random_guess_is_mean_fraction_for_single() {
        assert_eq!(
            random_guess_score(ChoiceMode::Single, &[1.0, 0.0, 0.5, 0.5]),
            Some(0.5)
        );
        assert_eq!(random_guess_score(ChoiceMode::Multi, &[0.5, 0.5]), None);
        assert_eq!(random_guess_score(ChoiceMode::Single, &[]), None);
    }
}
