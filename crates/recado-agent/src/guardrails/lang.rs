//! Minimal language identification for the language-match guardrail.
//!
//! Stopword-profile scoring over the handful of languages the assistant
//! actually serves. Short texts are unreliable, so the guardrail only
//! consults this above a length threshold.

/// `(iso_code, stopwords)` profiles. Scoring counts whole-word hits.
const PROFILES: &[(&str, &[&str])] = &[
    (
        "es",
        &[
            "el", "la", "los", "las", "de", "que", "y", "en", "un", "una", "es", "por", "con",
            "para", "como", "pero", "más", "hoy", "qué", "está", "hola", "gracias", "también",
            "día", "tengo", "hacer", "puedes",
        ],
    ),
    (
        "en",
        &[
            "the", "of", "and", "to", "in", "is", "you", "that", "it", "for", "on", "with", "as",
            "are", "this", "was", "what", "can", "have", "today", "please", "thanks", "hello",
        ],
    ),
    (
        "pt",
        &[
            "o", "a", "os", "as", "de", "que", "e", "em", "um", "uma", "é", "não", "com", "para",
            "como", "mas", "você", "obrigado", "hoje", "está",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "de", "que", "et", "en", "un", "une", "est", "pour", "avec", "pas",
            "vous", "je", "bonjour", "merci", "aujourd'hui",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "zu", "den", "ist", "von", "mit", "nicht", "ein", "eine",
            "ich", "du", "heute", "danke", "hallo", "bitte",
        ],
    ),
];

/// Best-guess ISO 639-1 code, or `None` when nothing scores.
pub fn detect(text: &str) -> Option<&'static str> {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect();
    if words.is_empty() {
        return None;
    }

    let mut best: Option<(&'static str, usize)> = None;
    for (code, stopwords) in PROFILES {
        let score = words
            .iter()
            .filter(|w| stopwords.contains(&w.as_str()))
            .count();
        if score == 0 {
            continue;
        }
        match best {
            Some((_, s)) if s >= score => {}
            _ => best = Some((code, score)),
        }
    }
    best.map(|(code, _)| code)
}
