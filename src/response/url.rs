//! Seed-carrying image URLs

/// Append the seed the backend used as a `seed` query parameter
pub fn with_seed(url: &str, seed: i64) -> String {
    let url = url.trim();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}seed={}", url, separator, seed)
}

/// Read the `seed` query parameter back out of an image URL
pub fn seed_from_url(url: &str) -> Option<i64> {
    let (_, query) = url.split_once('?')?;
    let query = query.split('#').next().unwrap_or(query);

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "seed")
        .and_then(|(_, value)| value.parse().ok())
}
