//! Upload metadata for a rendered short.

use crate::inventory::ScriptRecord;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_TAGS: usize = 15;
/// YouTube "People & Blogs".
pub const CATEGORY_PEOPLE_AND_BLOGS: &str = "22";

const BASE_TAGS: &[&str] = &[
    "bible",
    "faith",
    "christian",
    "shorts",
    "devotional",
    "scripture",
    "god",
    "jesus",
    "wisdom",
    "inspiration",
    "spiritual",
    "prayer",
    "hope",
    "love",
];

const TITLE_VARIANTS: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
    pub verse: String,
}

impl VideoMetadata {
    pub fn for_script(script: &ScriptRecord, privacy_status: &str) -> Self {
        let variant = rand::thread_rng().gen_range(0..TITLE_VARIANTS);
        Self::with_title_variant(script, privacy_status, variant)
    }

    pub fn with_title_variant(script: &ScriptRecord, privacy_status: &str, variant: usize) -> Self {
        let angle = angle_of(&script.text);
        Self {
            title: title_for(&script.verse, &angle, variant),
            description: description_for(&script.verse, &angle, &script.text),
            tags: tags_for(&script.keywords, &script.verse),
            category_id: CATEGORY_PEOPLE_AND_BLOGS.to_string(),
            privacy_status: privacy_status.to_string(),
            verse: script.verse.clone(),
        }
    }
}

/// First sentence of the script, used as the hook line.
fn angle_of(text: &str) -> String {
    let text = text.trim();
    let end = text
        .find(['.', '!', '?'])
        .map(|i| i + 1)
        .unwrap_or(text.len());
    text[..end].trim().to_string()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn title_for(verse: &str, angle: &str, variant: usize) -> String {
    let cut = |n: usize| truncate_chars(angle, n);
    let title = match variant % TITLE_VARIANTS {
        0 => format!("{}: {}... #Shorts", verse, cut(40)),
        1 => format!("📖 {} - {}... #Shorts", verse, cut(35)),
        2 => format!("{} Hits Different 💯 #Faith #Shorts", verse),
        3 => format!("Bible Truth: {}... ({})", cut(30), verse),
        4 => format!("✝️ {}: {}... #Bible", verse, cut(35)),
        _ => format!("🔥 {}... - {} #Shorts", cut(40), verse),
    };
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title;
    }

    let short_verse = verse.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
    let short = format!("{}: {}... #Shorts", short_verse, cut(40));
    truncate_chars(&short, MAX_TITLE_CHARS).to_string()
}

fn description_for(verse: &str, angle: &str, text: &str) -> String {
    let hook = if angle.chars().count() > 120 {
        format!("{}...", truncate_chars(angle, 117))
    } else {
        angle.to_string()
    };
    let verse_tag: String = verse.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    format!(
        "{hook}\n\n\
         📖 Scripture: {verse}\n\n\
         💭 {excerpt}...\n\n\
         🔔 SUBSCRIBE for daily Bible wisdom!\n\
         👍 LIKE if this spoke to your heart\n\
         💬 COMMENT your favorite verse below\n\n\
         #Bible #Faith #Christian #Shorts #{verse_tag} #Devotional #Scripture",
        excerpt = truncate_chars(text.trim(), 150),
    )
}

/// Verse tags first, then script keywords, then the channel's base tags;
/// deduplicated and capped at [`MAX_TAGS`].
fn tags_for(keywords: &[String], verse: &str) -> Vec<String> {
    let verse_tag: String = verse
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    let book = verse
        .rsplit_once(' ')
        .map(|(book, _)| book)
        .unwrap_or(verse)
        .to_lowercase();

    let candidates = [verse_tag, book]
        .into_iter()
        .chain(keywords.iter().map(|k| k.trim().to_lowercase()))
        .chain(BASE_TAGS.iter().map(|t| t.to_string()));

    let mut tags: Vec<String> = Vec::new();
    for tag in candidates {
        if tag.is_empty() || tags.contains(&tag) {
            continue;
        }
        tags.push(tag);
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::fallback_script;

    #[test]
    fn angle_is_first_sentence() {
        assert_eq!(angle_of("  You are loved. Always!"), "You are loved.");
        assert_eq!(angle_of("No punctuation"), "No punctuation");
    }

    #[test]
    fn every_title_variant_fits() {
        let mut script = fallback_script();
        script.verse = "1 Thessalonians 5:16-18".to_string();
        script.text = "Rejoice always ".repeat(20);
        for variant in 0..TITLE_VARIANTS {
            let meta = VideoMetadata::with_title_variant(&script, "public", variant);
            assert!(meta.title.chars().count() <= MAX_TITLE_CHARS, "{}", meta.title);
        }
    }

    #[test]
    fn tags_are_unique_and_capped() {
        let mut script = fallback_script();
        script.keywords = vec!["Love".into(), "hope".into(), " grace ".into()];
        let meta = VideoMetadata::with_title_variant(&script, "unlisted", 0);

        assert_eq!(meta.tags.len(), MAX_TAGS);
        assert_eq!(&meta.tags[..3], ["john316", "john", "love"]);
        assert!(meta.tags.contains(&"grace".to_string()));
        let mut dedup = meta.tags.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), meta.tags.len());
        assert_eq!(meta.category_id, "22");
        assert_eq!(meta.privacy_status, "unlisted");
    }

    #[test]
    fn multibyte_text_truncates_cleanly() {
        let mut script = fallback_script();
        script.text = "主は私の羊飼い".repeat(40);
        let meta = VideoMetadata::with_title_variant(&script, "public", 3);
        assert!(meta.description.contains("Scripture: John 3:16"));
    }
}
