//! Keyword detection over message text.
//!
//! Matching is a case-insensitive substring test against a fixed vocabulary.
//! Profile text (bio, names) is never scanned.

/// Built-in vocabulary: gaming, affiliate and traffic-arbitrage terms (EN + RU).
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "igaming", "casino", "bet", "betting", "poker", "slots", "gambling", "game", "games",
    "jackpot", "lottery", "roulette", "payments", "payment", "crypto", "bitcoin",
    "trading", "forex", "affiliate", "партнер", "казино", "ставки", "игры", "азарт",
    "криптовалюта", "трейдинг", "партнёрка", "реферал", "гемблинг", "букмекер",
    "bookmaker", "спорт", "sport", "прогноз", "прогнозы", "капер", "capper", "tipster",
    "бинанс", "binance", "сигнал", "spin", "spinz", "vegas", "roll", "highroll", "betwin",
    "betwinner", "melbet", "1xbet", "1xcasino", "cpa", "revshare", "traffic", "трафик",
    "arbitrage", "арбитраж", "sportsbook", "offers", "офферы", "офера", "manager",
    "менеджер", "leads", "леадс", "конверт", "conversion", "mediabuy", "медиабай",
    "webmaster", "вебмастер", "network", "сеть", "hybrid", "гибрид", "landing", "лендинг",
    "campaign", "кампании", "media", "медиа", "brand", "бренд", "investment", "инвест",
    "live", "deposit", "депозит", "bingo", "dice", "кости", "cards", "карты", "table",
    "столы", "wheel", "reel", "bizdev", "business development", "partners", "партнёры",
    "geo", "гео", "spend", "roi", "cpi", "cpl", "crg", "tier", "тир", "quality",
    "качество", "volume", "объем", "stable", "стабильный", "exclusive", "эксклюзив",
    "direct", "прямой", "advertiser", "рекламодатель", "performance", "перформанс",
    "profitable", "прибыльный", "scale", "масштаб", "budgets", "бюджеты",
];

#[derive(Clone, Debug)]
pub struct KeywordMatcher {
    terms: Vec<String>,
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().copied())
    }
}

impl KeywordMatcher {
    /// Build a matcher from a term list. Terms are lowercased; blanks and
    /// repeats are dropped so each term can match at most once.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for t in terms {
            let t = t.as_ref().trim().to_lowercase();
            if t.is_empty() || out.contains(&t) {
                continue;
            }
            out.push(t);
        }
        Self { terms: out }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Matched terms in vocabulary order (not message order).
    pub fn find(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lower = text.to_lowercase();
        self.terms
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .cloned()
            .collect()
    }
}
