//! Tokenization and deterministic lexical embeddings for search.
//!
//! The embedding is feature hashing over normalized tokens: each token is
//! hashed with BLAKE3 into one of [`EMBEDDING_DIM`] signed buckets and the
//! result is L2-normalized. It needs no model and is stable across runs, so
//! it can serve as a ranking tie-breaker.

/// Embedding dimensionality.
pub const EMBEDDING_DIM: usize = 64;

/// Lowercases and splits text on anything that is not a letter or digit.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Embeds a piece of text.
#[must_use]
pub fn embed(text: &str) -> Vec<f32> {
    embed_tokens(&tokenize(text))
}

/// Embeds already tokenized text.
#[must_use]
pub fn embed_tokens(tokens: &[String]) -> Vec<f32> {
    let mut vec = vec![0.0f32; EMBEDDING_DIM];
    if tokens.is_empty() {
        return vec;
    }

    for token in tokens {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&bytes[..8]);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (u64::from_le_bytes(bucket) % EMBEDDING_DIM as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign;
    }

    let norm = vec.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        #[allow(clippy::cast_possible_truncation)]
        let inv = norm.recip() as f32;
        vec.iter_mut().for_each(|x| *x *= inv);
    }
    vec
}

/// Cosine similarity of two embeddings; 0.0 if either is all zeros.
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Acme, Inc."), vec!["acme", "inc"]);
        assert_eq!(tokenize("Zürich-Straße 5"), vec!["zürich", "straße", "5"]);
        assert!(tokenize("  --  ").is_empty());
    }

    #[test]
    fn test_embedding_is_deterministic_and_normalized() {
        let a = embed("acme software");
        assert_eq!(a, embed("ACME   Software"));
        assert_eq!(a.len(), EMBEDDING_DIM);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_embeds_to_zero() {
        assert!(embed("").iter().all(|x| *x == 0.0));
        assert_eq!(cosine(&embed(""), &embed("acme")), 0.0);
    }

    #[test]
    fn test_cosine_prefers_overlap() {
        let q = embed("acme corp");
        let same = cosine(&q, &embed("acme corp"));
        let other = cosine(&q, &embed("globex holdings"));
        assert!((same - 1.0).abs() < 1e-5);
        assert!(same > other);
    }
}
