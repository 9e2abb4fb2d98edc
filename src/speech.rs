use anyhow::Result;
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

pub const CALL_TO_ACTION: &str =
    " If this encouraged you, hit that like button and subscribe for daily Bible wisdom!";

const META_INTROS: &[&str] = &[
    r"(?i)Here is a compelling YouTube Shorts script for the Bible verse?[^.]*\.?\s*",
    r"(?i)Here's a compelling YouTube Shorts script for[^.]*\.?\s*",
    r"(?i)Here (?:is|'s) a YouTube Shorts script based on[^.]*\.?\s*",
    r"(?i)This is a compelling script for[^.]*\.?\s*",
    r"(?i)Here (?:is|'s) a script for[^.]*\.?\s*",
    r"(?i)^Here(?: is|'s)[^:]*:\s*",
];

struct SpeechPatterns {
    intros: Vec<Regex>,
    markers: Regex,
    brackets: Regex,
    hashtags: Regex,
    verse: Regex,
    whitespace: Regex,
}

fn patterns() -> Result<&'static SpeechPatterns> {
    static PATTERNS: OnceCell<SpeechPatterns> = OnceCell::new();
    PATTERNS.get_or_try_init(|| {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| anyhow::anyhow!("failed to compile speech regex {p}: {e}"))
        };
        Ok(SpeechPatterns {
            intros: META_INTROS
                .iter()
                .map(|p| compile(*p))
                .collect::<Result<Vec<_>>>()?,
            markers: compile(r"(?i)\b(?:HOOK|VERSE|MEANING|APPLICATION|CTA):\s*")?,
            brackets: compile(r"\[.*?\]|\(.*?\)|\{.*?\}")?,
            hashtags: compile(r"#\w+")?,
            verse: compile(r"(\w+)\s+(\d+):(\d+)(?:-(\d+))?")?,
            whitespace: compile(r"\s+")?,
        })
    })
}

/// Turns a stored script into text a TTS engine reads naturally.
///
/// Strips generator chatter and section markers, bracketed notes and hashtags,
/// spells verse references out ("John 3:16" reads "John three sixteen") and
/// appends the channel call to action when the script has none.
pub fn clean_script_for_speech(script: &str) -> Result<String> {
    let p = patterns()?;

    let mut cleaned = script.to_string();
    for intro in &p.intros {
        cleaned = intro.replace_all(&cleaned, "").into_owned();
    }
    cleaned = p.markers.replace_all(&cleaned, "").into_owned();
    cleaned = p.brackets.replace_all(&cleaned, "").into_owned();
    cleaned = p.hashtags.replace_all(&cleaned, "").into_owned();
    cleaned = p
        .verse
        .replace_all(&cleaned, |caps: &Captures| spell_reference(caps))
        .into_owned();
    cleaned = p.whitespace.replace_all(&cleaned, " ").trim().to_string();
    cleaned.retain(|c| !matches!(c, '"' | '\u{201C}' | '\u{201D}'));

    let lower = cleaned.to_lowercase();
    if !lower.contains("like") && !lower.contains("subscribe") {
        if !cleaned.ends_with(['.', '!', '?']) {
            cleaned.push('.');
        }
        cleaned.push_str(CALL_TO_ACTION);
    }
    Ok(cleaned)
}

fn spell_reference(caps: &Captures) -> String {
    let number = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .map(number_to_words)
    };
    let (Some(chapter), Some(verse)) = (number(2), number(3)) else {
        return caps[0].to_string();
    };

    let mut spoken = format!("{} {} {}", &caps[1], chapter, verse);
    if let Some(end) = number(4) {
        spoken.push_str(" to ");
        spoken.push_str(&end);
    }
    spoken
}

/// English words for 0-999; larger numbers come back as digits.
pub fn number_to_words(n: u32) -> String {
    const ONES: [&str; 20] = [
        "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
        "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen",
        "eighteen", "nineteen",
    ];
    const TENS: [&str; 10] = [
        "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
    ];

    match n {
        0..=19 => ONES[n as usize].to_string(),
        20..=99 => {
            let tens = TENS[(n / 10) as usize];
            match n % 10 {
                0 => tens.to_string(),
                ones => format!("{} {}", tens, ONES[ones as usize]),
            }
        }
        100..=999 => {
            let hundreds = format!("{} hundred", ONES[(n / 100) as usize]);
            match n % 100 {
                0 => hundreds,
                rest => format!("{} {}", hundreds, number_to_words(rest)),
            }
        }
        _ => n.to_string(),
    }
}
