//! INSEE headcount range codes ("tranche d'effectif").

const LABELS: &[(u8, &str)] = &[
    (0, "0 salarié"),
    (1, "1 ou 2 salariés"),
    (2, "3 à 5 salariés"),
    (3, "6 à 9 salariés"),
    (11, "10 à 19 salariés"),
    (12, "20 à 49 salariés"),
    (21, "50 à 99 salariés"),
    (22, "100 à 199 salariés"),
    (31, "200 à 249 salariés"),
    (32, "250 à 499 salariés"),
    (41, "500 à 999 salariés"),
    (42, "1 000 à 1 999 salariés"),
    (51, "2 000 à 4 999 salariés"),
    (52, "5 000 à 9 999 salariés"),
    (53, "10 000 salariés et plus"),
];

pub fn headcount_label(code: u8) -> Option<&'static str> {
    LABELS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| *label)
}

pub fn is_known_headcount(code: u8) -> bool {
    headcount_label(code).is_some()
}

/// Parses an index bucket key (`"00"`, `"21"`, `"21.0"`) into a size code.
pub fn parse_headcount_code(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    raw.parse::<u8>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(value))
            .map(|value| value as u8)
    })
}
