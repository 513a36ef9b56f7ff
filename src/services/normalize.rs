/// Preparation words that change a food's nutrition per gram.
const PREP_WORDS: &[&str] = &[
    "raw", "cooked", "grilled", "baked", "boiled", "roasted", "fried", "steamed", "poached",
    "sauteed", "broiled", "scrambled", "dried", "canned", "smoked",
];

/// Words that add nothing to a food lookup.
const FILLER_WORDS: &[&str] = &[
    "fresh", "boneless", "skinless", "chopped", "diced", "sliced", "organic", "large", "medium",
    "small", "plain", "lean", "of", "and", "the",
];

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '%' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// An ingredient name split into the food itself and how it was prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodKey {
    pub base: String,
    pub prep: Option<String>,
}

impl FoodKey {
    pub fn parse(name: &str) -> Self {
        let normalized = normalize_name(name);
        let mut prep = None;
        let mut base = Vec::new();
        for word in normalized.split(' ') {
            if PREP_WORDS.contains(&word) {
                prep.get_or_insert_with(|| word.to_string());
            } else if !FILLER_WORDS.contains(&word) && !word.is_empty() {
                base.push(word);
            }
        }
        Self {
            base: base.join(" "),
            prep,
        }
    }

    /// Query sent to the nutrition database.
    pub fn query(&self) -> String {
        match &self.prep {
            Some(p) => format!("{} {}", self.base, p),
            None => self.base.clone(),
        }
    }

    /// Cache key shared across users: food facts are universal.
    pub fn cache_key(&self) -> String {
        format!(
            "nutrition:{}:{}",
            self.base.replace(' ', "_"),
            self.prep.as_deref().unwrap_or("any")
        )
    }
}
