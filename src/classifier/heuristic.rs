use super::{Classification, ClassificationSource, LeadText, Tier};

const MIN_MEANINGFUL_CHARS: usize = 20;
const LONG_BRIEF_CHARS: usize = 1200;
const LINK_FARM_THRESHOLD: usize = 3;

const SPAM_MARKERS: &[&str] = &[
    "seo services",
    "backlink",
    "guest post",
    "link building",
    "crypto",
    "bitcoin",
    "casino",
    "forex",
    "loan offer",
    "rank your website",
    "first page of google",
    "increase your traffic",
    "unsubscribe",
];

const COMPLEXITY_MARKERS: &[&str] = &[
    "enterprise",
    "integration",
    "migration",
    "migrate",
    "compliance",
    "hipaa",
    "gdpr",
    "platform",
    "saas",
    "multi-tenant",
    "api",
    "marketplace",
    "erp",
    "crm",
    "real-time",
    "machine learning",
    "mobile app",
];

const SIMPLE_MARKERS: &[&str] = &[
    "landing page",
    "one page",
    "one-page",
    "single page",
    "refresh",
    "update",
    "portfolio",
    "small business",
    "brochure",
    "wordpress",
    "squarespace",
    "wix",
];

/// Rule-based tiering used whenever the completion service cannot answer.
/// Rules are evaluated in order and the first match wins.
pub fn classify(lead: &LeadText<'_>) -> Classification {
    let text = lead.combined_text().to_lowercase();
    let meaningful = text.chars().filter(|c| c.is_alphanumeric()).count();

    if meaningful < MIN_MEANINGFUL_CHARS {
        return verdict(
            Tier::Disqualify,
            0.6,
            "inquiry contains too little information to scope",
        );
    }

    let spam_hits = count_hits(&text, SPAM_MARKERS);
    let links = text.matches("http://").count() + text.matches("https://").count();
    if spam_hits > 0 || links >= LINK_FARM_THRESHOLD {
        return verdict(
            Tier::Disqualify,
            0.7,
            "inquiry matches unsolicited sales or spam patterns",
        );
    }

    let complexity_hits = count_hits(&text, COMPLEXITY_MARKERS);
    if complexity_hits >= 2 || text.chars().count() > LONG_BRIEF_CHARS {
        return verdict(
            Tier::Hard,
            0.55,
            "scope mentions multiple complex systems or a long brief; needs a human review",
        );
    }

    if complexity_hits == 0 && count_hits(&text, SIMPLE_MARKERS) > 0 {
        return verdict(
            Tier::Softball,
            0.6,
            "small, well-understood website scope",
        );
    }

    verdict(
        Tier::Medium,
        0.55,
        "standard project inquiry without strong complexity signals",
    )
}

fn count_hits(text: &str, markers: &[&str]) -> usize {
    markers
        .iter()
        .filter(|marker| contains_term(text, marker))
        .count()
}

/// Word-bounded match so that short markers such as "api" do not fire on
/// "rapid" or "capital".
fn contains_term(text: &str, term: &str) -> bool {
    text.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn verdict(tier: Tier, confidence: f64, rationale: &str) -> Classification {
    Classification {
        tier,
        confidence,
        rationale: rationale.to_string(),
        source: ClassificationSource::Heuristic,
        model: None,
        fallback_reason: None,
    }
}
