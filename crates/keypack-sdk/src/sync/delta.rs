//! Delta 计算
//!
//! 纯集合差运算，无副作用。针对单个 (国家, 粒度) 作用域，
//! 输入输出都是无序的桶键集合。

use std::collections::HashSet;

/// 需要从服务器拉取的桶：`server − local`
pub fn server_delta(local: &HashSet<String>, server: &HashSet<String>) -> HashSet<String> {
    server.difference(local).cloned().collect()
}

/// 需要从本地清理的桶（服务器已撤回）：`local − server`
pub fn local_delta(local: &HashSet<String>, server: &HashSet<String>) -> HashSet<String> {
    local.difference(server).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_delta_basic() {
        let local = set(&["2021-01-09", "2021-01-10"]);
        let server = set(&["2021-01-10", "2021-01-11"]);

        assert_eq!(server_delta(&local, &server), set(&["2021-01-11"]));
        assert_eq!(local_delta(&local, &server), set(&["2021-01-09"]));
    }

    #[test]
    fn test_delta_equal_sets_are_empty() {
        let keys = set(&["2021-01-10", "2021-01-11"]);
        assert!(server_delta(&keys, &keys).is_empty());
        assert!(local_delta(&keys, &keys).is_empty());
    }

    #[test]
    fn test_empty_local_fetches_everything() {
        let local = HashSet::new();
        let server = set(&["0", "1", "2"]);
        assert_eq!(server_delta(&local, &server), server);
        assert!(local_delta(&local, &server).is_empty());
    }

    #[test]
    fn test_empty_server_prunes_everything() {
        let local = set(&["0", "1", "2"]);
        let server = HashSet::new();
        assert!(server_delta(&local, &server).is_empty());
        assert_eq!(local_delta(&local, &server), local);
    }
}
