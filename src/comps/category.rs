use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TradingCards,
    VideoGames,
    Shoes,
    Electronics,
    Clothing,
    Toys,
    Collectibles,
    Other,
}

struct CategoryDefinition {
    category: Category,
    label: &'static str,
    ebay_category_id: &'static str,
    ttl_hours: u64,
    keywords: &'static [&'static str],
}

// Detection walks this table top to bottom; the first keyword hit wins.
const CATEGORY_POOL: [CategoryDefinition; 8] = [
    CategoryDefinition {
        category: Category::TradingCards,
        label: "Trading Cards",
        ebay_category_id: "183454",
        ttl_hours: 3,
        keywords: &[
            "pokemon", "mtg", "magic the gathering", "yugioh", "yu gi oh", "tcg", "psa",
            "bgs", "holo", "booster",
        ],
    },
    CategoryDefinition {
        category: Category::VideoGames,
        label: "Video Games",
        ebay_category_id: "139973",
        ttl_hours: 12,
        keywords: &[
            "playstation", "ps1", "ps2", "ps3", "ps4", "ps5", "xbox", "nintendo", "switch",
            "gamecube", "wii", "game boy", "gameboy", "sega", "dualsense", "dualshock",
            "joy con", "controller", "video game",
        ],
    },
    CategoryDefinition {
        category: Category::Shoes,
        label: "Shoes",
        ebay_category_id: "15709",
        ttl_hours: 12,
        keywords: &[
            "nike", "jordan", "adidas", "yeezy", "sneaker", "sneakers", "shoe", "shoes", "dunk",
            "new balance", "asics", "vans", "converse",
        ],
    },
    CategoryDefinition {
        category: Category::Electronics,
        label: "Electronics",
        ebay_category_id: "293",
        ttl_hours: 24,
        keywords: &[
            "iphone", "ipad", "macbook", "airpods", "galaxy", "pixel", "camera", "lens",
            "headphones", "laptop", "gpu", "kindle",
        ],
    },
    CategoryDefinition {
        category: Category::Clothing,
        label: "Clothing",
        ebay_category_id: "11450",
        ttl_hours: 72,
        keywords: &[
            "jacket", "hoodie", "sweater", "jeans", "shirt", "dress", "coat", "patagonia",
            "levis", "supreme",
        ],
    },
    CategoryDefinition {
        category: Category::Toys,
        label: "Toys",
        ebay_category_id: "220",
        ttl_hours: 24,
        keywords: &["lego", "funko", "hot wheels", "barbie", "action figure", "plush"],
    },
    CategoryDefinition {
        category: Category::Collectibles,
        label: "Collectibles",
        ebay_category_id: "1",
        ttl_hours: 6,
        keywords: &["vintage", "collectible", "coin", "stamp", "autograph", "signed"],
    },
    CategoryDefinition {
        category: Category::Other,
        label: "Other",
        ebay_category_id: "0",
        ttl_hours: 12,
        keywords: &[],
    },
];

/// Keywords marking gaming accessories, which the curated catalog mismatches.
pub const ACCESSORY_KEYWORDS: &[&str] = &[
    "controller", "case", "cable", "charger", "headset", "adapter", "dock", "stand", "skin",
    "sleeve", "grip", "battery",
];

impl Category {
    fn definition(&self) -> &'static CategoryDefinition {
        CATEGORY_POOL
            .iter()
            .find(|def| def.category == *self)
            .unwrap_or(&CATEGORY_POOL[CATEGORY_POOL.len() - 1])
    }

    pub fn label(&self) -> &'static str {
        self.definition().label
    }

    pub fn ebay_category_id(&self) -> &'static str {
        self.definition().ebay_category_id
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.definition().ttl_hours * 3600)
    }

    /// Lenient label lookup: "video games", "Video_Games" and "videogames" all match.
    pub fn from_label(raw: &str) -> Option<Self> {
        let wanted = squash(raw);
        if wanted.is_empty() {
            return None;
        }
        CATEGORY_POOL
            .iter()
            .find(|def| {
                squash(def.label) == wanted
                    || squash(&format!("{:?}", def.category)) == wanted
            })
            .map(|def| def.category)
    }

    pub fn detect(title: &str) -> Self {
        let text = format!(" {} ", normalize_words(title));
        CATEGORY_POOL
            .iter()
            .find(|def| {
                def.keywords
                    .iter()
                    .any(|keyword| text.contains(&format!(" {keyword} ")))
            })
            .map(|def| def.category)
            .unwrap_or(Category::Other)
    }

    /// Uses the caller's category when it names a known, specific one and
    /// falls back to keyword detection otherwise.
    pub fn resolve(requested: Option<&str>, title: &str) -> Self {
        match requested.and_then(Self::from_label) {
            Some(Category::Other) | None => Self::detect(title),
            Some(category) => category,
        }
    }

    /// Categories the curated catalog prices by exact product match.
    pub fn has_catalog_match(&self) -> bool {
        matches!(self, Category::VideoGames | Category::TradingCards)
    }
}

pub fn is_accessory(title: &str) -> bool {
    let text = format!(" {} ", normalize_words(title));
    ACCESSORY_KEYWORDS.iter().any(|keyword| {
        text.contains(&format!(" {keyword} ")) || text.contains(&format!(" {keyword}s "))
    })
}

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn normalize_words(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_shoes_from_title() {
        assert_eq!(Category::detect("Nike Air Jordan 1"), Category::Shoes);
        assert_eq!(Category::detect("Pokemon Charizard Holo PSA 9"), Category::TradingCards);
        assert_eq!(Category::detect("Zelda Tears of the Kingdom Switch"), Category::VideoGames);
        assert_eq!(Category::detect("box of assorted things"), Category::Other);
    }

    #[test]
    fn resolve_prefers_known_category_and_detects_otherwise() {
        assert_eq!(
            Category::resolve(Some("Video Games"), "Nike Air Jordan 1"),
            Category::VideoGames
        );
        assert_eq!(Category::resolve(Some("other"), "Nike Air Jordan 1"), Category::Shoes);
        assert_eq!(Category::resolve(Some("garbage"), "Nike Air Jordan 1"), Category::Shoes);
        assert_eq!(Category::resolve(None, "Nike Air Jordan 1"), Category::Shoes);
    }

    #[test]
    fn labels_are_lenient() {
        assert_eq!(Category::from_label("trading_cards"), Some(Category::TradingCards));
        assert_eq!(Category::from_label("VideoGames"), Some(Category::VideoGames));
        assert_eq!(Category::from_label(""), None);
    }

    #[test]
    fn accessory_keywords_match_whole_words() {
        assert!(is_accessory("PS5 DualSense Controller White"));
        assert!(is_accessory("Nintendo Switch carrying case"));
        assert!(is_accessory("USB-C cables 3 pack"));
        assert!(!is_accessory("Pokemon Base Set Charizard"));
        assert!(!is_accessory("Showcase edition"));
    }

    #[test]
    fn volatile_categories_expire_sooner() {
        assert!(Category::TradingCards.default_ttl() < Category::Clothing.default_ttl());
        assert_eq!(Category::Other.default_ttl(), Duration::from_secs(12 * 3600));
    }
}
