fn fold(value: &str) -> Vec<char> {
    value
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Ranks `candidates` by closeness to `input`. Substring matches score 1;
/// otherwise the edit distance must stay within a length-scaled budget.
pub fn suggest(input: &str, candidates: &[String], limit: usize) -> Vec<String> {
    let needle = fold(input);
    if needle.is_empty() {
        return Vec::new();
    }
    let budget = match needle.len() {
        0..=4 => 1,
        5..=8 => 2,
        n => (n / 3).max(3),
    };

    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .filter_map(|candidate| {
            let hay = fold(candidate);
            if hay.is_empty() {
                return None;
            }
            let score = if hay == needle {
                0
            } else if contains(&hay, &needle) || contains(&needle, &hay) {
                1
            } else {
                edit_distance(&needle, &hay)
            };
            (score <= budget).then_some((score, candidate))
        })
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit.max(1))
        .map(|(_, candidate)| candidate.clone())
        .collect()
}

fn contains(hay: &[char], needle: &[char]) -> bool {
    needle.len() <= hay.len() && hay.windows(needle.len()).any(|w| w == needle)
}
