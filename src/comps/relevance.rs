use crate::comps::ComparableSale;
use crate::comps::family::ControllerFamily;
use std::collections::HashSet;

pub const FAMILY_THRESHOLD: f64 = 0.25;
pub const DEFAULT_THRESHOLD: f64 = 0.35;
const MIN_KEPT: usize = 3;
const FALLBACK_TOP: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "for", "with", "of", "in", "on", "to", "by", "from", "new",
    "used", "brand", "authentic", "genuine", "free", "shipping",
];

// Applied to space-padded normalized text, so entries match whole words.
const SPELLING_VARIANTS: &[(&str, &str)] = &[
    ("play station", "playstation"),
    ("ps 5", "ps5"),
    ("ps 4", "ps4"),
    ("x box", "xbox"),
    ("dual sense", "dualsense"),
    ("dual shock", "dualshock"),
    ("joycon", "joy con"),
    ("joycons", "joy con"),
    ("yu gi oh", "yugioh"),
    ("game cube", "gamecube"),
    ("air pods", "airpods"),
    ("i phone", "iphone"),
];

const BUNDLE_WORDS: &[&str] = &["lot", "lots", "bundle", "bulk", "wholesale"];

#[derive(Debug, Clone)]
pub struct RelevanceOutcome {
    pub comps: Vec<ComparableSale>,
    pub dropped: usize,
    pub used_fallback: bool,
}

pub fn normalize_title(raw: &str) -> String {
    let lowered: String = raw
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' => 'e',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();
    let mut padded = format!(" {} ", lowered.split_whitespace().collect::<Vec<_>>().join(" "));
    for (variant, canonical) in SPELLING_VARIANTS {
        let needle = format!(" {variant} ");
        let replacement = format!(" {canonical} ");
        while padded.contains(&needle) {
            padded = padded.replace(&needle, &replacement);
        }
    }
    padded.trim().to_string()
}

/// Distinct non-stopword tokens of the query, in order of appearance.
pub fn query_tokens(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    normalize_title(query)
        .split_whitespace()
        .filter(|token| !STOPWORDS.contains(token))
        .filter(|token| seen.insert(token.to_string()))
        .map(str::to_string)
        .collect()
}

/// `(exact + 0.5 * partial) / tokens`. Partial matches need three characters
/// on both sides so that "1" does not hit "13".
pub fn relevance_score(tokens: &[String], normalized_title: &str) -> f64 {
    if tokens.is_empty() {
        return 1.0;
    }
    let title_tokens: HashSet<&str> = normalized_title.split_whitespace().collect();
    let mut exact = 0usize;
    let mut partial = 0usize;
    for token in tokens {
        if title_tokens.contains(token.as_str()) {
            exact += 1;
        } else if token.len() >= 3
            && title_tokens.iter().any(|candidate| {
                candidate.len() >= 3
                    && (candidate.contains(token.as_str()) || token.contains(candidate))
            })
        {
            partial += 1;
        }
    }
    (exact as f64 + 0.5 * partial as f64) / tokens.len() as f64
}

pub fn is_bundle(normalized: &str) -> bool {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.windows(2).any(|pair| pair == ["set", "of"]) {
        return true;
    }
    words
        .iter()
        .any(|word| BUNDLE_WORDS.contains(word) || is_multiplier(word))
}

fn is_multiplier(word: &str) -> bool {
    let digits = word
        .strip_prefix('x')
        .or_else(|| word.strip_suffix('x'))
        .unwrap_or("");
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && digits.parse::<u32>().is_ok_and(|count| count >= 2)
}

struct Scored {
    index: usize,
    score: f64,
    compatible: bool,
    bundle: bool,
}

/// Drops comparables that describe a different product than `query`.
///
/// Running the filter on its own output returns that output unchanged.
pub fn filter_relevant(
    comps: Vec<ComparableSale>,
    query: &str,
    item_title: Option<&str>,
) -> RelevanceOutcome {
    let total = comps.len();
    let tokens = query_tokens(query);
    let context = normalize_title(&format!("{query} {}", item_title.unwrap_or("")));
    let query_family = ControllerFamily::classify(&context);
    let query_is_bundle = is_bundle(&context);
    let threshold = if query_family.is_some() {
        FAMILY_THRESHOLD
    } else {
        DEFAULT_THRESHOLD
    };

    let scored: Vec<Scored> = comps
        .iter()
        .enumerate()
        .map(|(index, comp)| {
            let title = normalize_title(&comp.title);
            let compatible = match query_family {
                Some(wanted) => ControllerFamily::classify(&title)
                    .is_some_and(|found| wanted.compatible_with(found)),
                None => true,
            };
            Scored {
                index,
                score: relevance_score(&tokens, &title),
                compatible,
                bundle: !query_is_bundle && is_bundle(&title),
            }
        })
        .collect();

    let pool: Vec<&Scored> = scored.iter().filter(|entry| !entry.bundle).collect();
    let mut keep: Vec<usize> = pool
        .iter()
        .filter(|entry| entry.compatible && entry.score >= threshold)
        .map(|entry| entry.index)
        .collect();

    let mut used_fallback = false;
    if keep.len() < MIN_KEPT && pool.len() >= MIN_KEPT {
        // The threshold may be waived here, family compatibility may not.
        let mut ranked: Vec<&Scored> =
            pool.iter().copied().filter(|entry| entry.compatible).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        keep = ranked
            .into_iter()
            .take(FALLBACK_TOP)
            .map(|entry| entry.index)
            .collect();
        keep.sort_unstable();
        used_fallback = true;
    }

    let keep: HashSet<usize> = keep.into_iter().collect();
    let kept: Vec<ComparableSale> = comps
        .into_iter()
        .enumerate()
        .filter(|(index, _)| keep.contains(index))
        .map(|(_, comp)| comp)
        .collect();

    RelevanceOutcome {
        dropped: total - kept.len(),
        comps: kept,
        used_fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comps::SaleDate;
    use crate::money::Money;

    fn comp(title: &str) -> ComparableSale {
        ComparableSale::new(title, 50.0, Money::free(), "Used", SaleDate::Sold("2024-08-01".into()))
    }

    fn titles(outcome: &RelevanceOutcome) -> Vec<&str> {
        outcome.comps.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn normalizes_punctuation_and_variants() {
        assert_eq!(normalize_title("Sony  PS-5 DualSense!!"), "sony ps5 dualsense");
        assert_eq!(normalize_title("Play Station 4 Pro"), "playstation 4 pro");
        assert_eq!(normalize_title("Joy-Con (L/R) Neon"), "joy con l r neon");
        assert_eq!(normalize_title("Pokémon Charizard"), "pokemon charizard");
    }

    #[test]
    fn query_tokens_skip_stopwords_and_duplicates() {
        assert_eq!(
            query_tokens("The New Nike Air Jordan 1 for Nike fans"),
            vec!["nike", "air", "jordan", "1", "fans"]
        );
    }

    #[test]
    fn scores_exact_and_partial_matches() {
        let tokens = query_tokens("pokemon charizard");
        assert_eq!(relevance_score(&tokens, "pokemon charizard holo"), 1.0);
        assert_eq!(relevance_score(&tokens, "pokemon charizards lot"), 0.75);
        let tokens = query_tokens("nike air jordan 1");
        assert_eq!(relevance_score(&tokens, &normalize_title("iPhone 13 case")), 0.0);
    }

    #[test]
    fn keeps_jordans_and_drops_phone_case() {
        let comps = vec![
            comp("Nike Air Jordan 1 Retro High OG Chicago"),
            comp("iPhone 13 case"),
            comp("Air Jordan 1 Mid Bred Toe"),
            comp("NIKE AIR JORDAN 1 LOW size 10"),
            comp("Jordan 1 Retro Mocha"),
        ];
        let outcome = filter_relevant(comps, "Nike Air Jordan 1", None);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.dropped, 1);
        assert!(!titles(&outcome).contains(&"iPhone 13 case"));
        assert_eq!(outcome.comps.len(), 4);
    }

    #[test]
    fn drops_lots_and_bundles_unless_asked_for() {
        let comps = vec![
            comp("Pokemon Charizard holo 4/102"),
            comp("Pokemon card lot 50 cards Charizard"),
            comp("Charizard pokemon x3 bundle"),
            comp("Pokemon Charizard base set"),
            comp("Pokemon Charizard shadowless"),
        ];
        let outcome = filter_relevant(comps.clone(), "pokemon charizard", None);
        assert_eq!(outcome.comps.len(), 3);
        assert!(titles(&outcome).iter().all(|t| !t.contains("lot") && !t.contains("bundle")));

        let outcome = filter_relevant(comps, "pokemon charizard lot", None);
        assert_eq!(outcome.comps.len(), 5);
    }

    #[test]
    fn premium_controller_families_are_not_interchangeable() {
        let comps = vec![
            comp("Sony DualSense Edge Wireless Controller"),
            comp("Sony DualSense Wireless Controller White"),
            comp("PS5 DualSense controller midnight black"),
            comp("DualSense controller cosmic red"),
            comp("PlayStation 5 console disc edition"),
        ];
        let outcome = filter_relevant(comps, "PS5 DualSense controller", None);
        let kept = titles(&outcome);
        assert_eq!(kept.len(), 3);
        assert!(!kept.iter().any(|t| t.contains("Edge")));
        assert!(!kept.iter().any(|t| t.contains("console")));
    }

    #[test]
    fn fallback_never_admits_another_premium_family() {
        let comps = vec![
            comp("Sony PS5 DualSense Wireless Controller"),
            comp("DualSense Controller Galactic Purple"),
            comp("Sony DualSense Edge Pro controller"),
            comp("DualSense Edge wireless controller boxed"),
            comp("PS5 DualSense Edge controller with case"),
        ];
        let outcome = filter_relevant(comps, "PS5 DualSense controller", None);
        let kept = titles(&outcome);
        assert_eq!(
            kept,
            vec![
                "Sony PS5 DualSense Wireless Controller",
                "DualSense Controller Galactic Purple"
            ]
        );
        assert_eq!(outcome.dropped, 3);
    }

    #[test]
    fn falls_back_to_top_five_when_filter_collapses() {
        let comps = vec![
            comp("Vintage brass lamp"),
            comp("Retro lamp shade"),
            comp("Desk organizer"),
            comp("Brass candle holder"),
            comp("Lamp base only"),
            comp("Picture frame"),
            comp("Old clock"),
        ];
        let outcome = filter_relevant(comps, "mid century brass table lamp", None);
        assert!(outcome.used_fallback);
        assert_eq!(outcome.comps.len(), 5);
        assert_eq!(outcome.comps[0].title, "Vintage brass lamp");
    }

    #[test]
    fn small_candidate_sets_do_not_fall_back() {
        let comps = vec![comp("Desk organizer"), comp("Picture frame")];
        let outcome = filter_relevant(comps, "brass table lamp", None);
        assert!(!outcome.used_fallback);
        assert!(outcome.comps.is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let inputs = vec![
            vec![
                comp("Nike Air Jordan 1 Retro High OG Chicago"),
                comp("iPhone 13 case"),
                comp("Air Jordan 1 Mid Bred Toe"),
                comp("Jordan 1 Retro Mocha"),
            ],
            vec![
                comp("Vintage brass lamp"),
                comp("Retro lamp shade"),
                comp("Desk organizer"),
                comp("Brass candle holder"),
                comp("Lamp base only"),
                comp("Picture frame"),
                comp("Old clock"),
            ],
            vec![comp("lot of 3 lamps"), comp("brass lamp"), comp("Desk organizer")],
        ];
        for (query, comps) in ["nike air jordan 1", "brass table lamp", "brass table lamp"]
            .into_iter()
            .zip(inputs)
        {
            let once = filter_relevant(comps, query, None);
            let twice = filter_relevant(once.comps.clone(), query, None);
            assert_eq!(once.comps, twice.comps, "{query}");
            assert_eq!(twice.dropped, 0);
        }
    }
}
