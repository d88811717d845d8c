use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of the id pairing a watch registration with its event stream
pub const SESSION_ID_LEN: usize = 5;

/// Random token drawn uniformly from `[A-Za-z0-9]`
pub fn generate_session_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id(SESSION_ID_LEN);
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_session_id_custom_length() {
        assert_eq!(generate_session_id(0), "");
        assert_eq!(generate_session_id(32).len(), 32);
    }

    #[test]
    fn test_session_ids_vary() {
        let ids: std::collections::HashSet<_> = (0..20).map(|_| generate_session_id(16)).collect();
        assert!(ids.len() > 1);
    }
}
