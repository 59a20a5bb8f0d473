//! Hero candidate scoring.
//!
//! Each signal is its own sub-score; a candidate's total is their plain sum.

/// Call-to-action phrases matched case-insensitively as substrings of a
/// link or button label.
pub const CTA_PHRASES: &[&str] = &[
    "get started",
    "start free",
    "start your free",
    "free trial",
    "try it free",
    "try for free",
    "try now",
    "sign up",
    "signup",
    "create account",
    "create an account",
    "join now",
    "join free",
    "book a demo",
    "request a demo",
    "get a demo",
    "schedule a demo",
    "see a demo",
    "watch demo",
    "contact sales",
    "talk to sales",
    "get in touch",
    "buy now",
    "shop now",
    "subscribe",
    "download",
    "learn more",
];

const HERO_NAME_HINTS: &[&str] = &["hero", "banner", "jumbotron"];

/// Candidates at or beyond this index get no position credit.
const POSITION_CAP: i32 = 20;
const HEADING_BONUS: i32 = 15;
const CTA_BONUS: i32 = 25;
const HERO_NAME_BONUS: i32 = 10;
const MEDIA_BONUS: i32 = 5;

/// Observations about one candidate block, collected during traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSignals {
    /// Position among the block-level candidates, 0 for the first.
    pub index: usize,
    pub has_heading: bool,
    pub has_cta: bool,
    pub hero_like_name: bool,
    pub has_media: bool,
}

pub fn position_score(index: usize) -> i32 {
    let index = i32::try_from(index).unwrap_or(i32::MAX);
    POSITION_CAP.saturating_sub(index).max(0)
}

pub fn heading_score(has_heading: bool) -> i32 {
    if has_heading {
        HEADING_BONUS
    } else {
        0
    }
}

pub fn cta_score(has_cta: bool) -> i32 {
    if has_cta {
        CTA_BONUS
    } else {
        0
    }
}

pub fn hero_name_score(hero_like_name: bool) -> i32 {
    if hero_like_name {
        HERO_NAME_BONUS
    } else {
        0
    }
}

pub fn media_score(has_media: bool) -> i32 {
    if has_media {
        MEDIA_BONUS
    } else {
        0
    }
}

pub fn total_score(signals: &CandidateSignals) -> i32 {
    position_score(signals.index)
        + heading_score(signals.has_heading)
        + cta_score(signals.has_cta)
        + hero_name_score(signals.hero_like_name)
        + media_score(signals.has_media)
}

/// Whether a visible label reads like a call to action.
pub fn is_cta_label(label: &str) -> bool {
    let label = label.to_lowercase();
    CTA_PHRASES.iter().any(|phrase| label.contains(phrase))
}

/// Whether a class or id value marks the element as a hero block.
pub fn is_hero_like_name(name: &str) -> bool {
    let name = name.to_lowercase();
    HERO_NAME_HINTS.iter().any(|hint| name.contains(hint))
}

/// Index of the best candidate; ties go to the earliest.
pub fn best_candidate(scores: &[i32]) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_score_decreases_and_floors() {
        assert_eq!(position_score(0), 20);
        assert_eq!(position_score(5), 15);
        assert_eq!(position_score(20), 0);
        assert_eq!(position_score(500), 0);
        assert_eq!(position_score(usize::MAX), 0);
    }

    #[test]
    fn test_cta_outweighs_heading() {
        assert!(cta_score(true) > heading_score(true));
        assert!(heading_score(true) > hero_name_score(true));
        assert!(hero_name_score(true) > media_score(true));
        assert_eq!(cta_score(false) + heading_score(false), 0);
    }

    #[test]
    fn test_total_is_sum_of_parts() {
        let signals = CandidateSignals {
            index: 3,
            has_heading: true,
            has_cta: true,
            hero_like_name: false,
            has_media: true,
        };
        assert_eq!(total_score(&signals), 17 + 15 + 25 + 5);
    }

    #[test]
    fn test_cta_label_matching() {
        assert!(is_cta_label("Get Started"));
        assert!(is_cta_label("  BOOK A DEMO today "));
        assert!(is_cta_label("Start your free trial"));
        assert!(!is_cta_label("About us"));
        assert!(!is_cta_label(""));
    }

    #[test]
    fn test_hero_like_name() {
        assert!(is_hero_like_name("page-hero wide"));
        assert!(is_hero_like_name("TopBanner"));
        assert!(is_hero_like_name("jumbotron"));
        assert!(!is_hero_like_name("content"));
    }

    #[test]
    fn test_best_candidate_keeps_first_maximum() {
        assert_eq!(best_candidate(&[]), None);
        assert_eq!(best_candidate(&[3, 9, 9, 1]), Some(1));
        assert_eq!(best_candidate(&[0, 0]), Some(0));
        assert_eq!(best_candidate(&[-1, 4]), Some(1));
    }
}
