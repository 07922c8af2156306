//! 信念历史剪枝：每个 key 只保留最后一次追加的事件，保持相对顺序

use std::collections::HashSet;

use super::model::BeliefEvent;

/// 从尾部扫描，保留每个 key 的第一次出现，再恢复正序
pub fn prune_history(history: &[BeliefEvent]) -> Vec<BeliefEvent> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut kept = Vec::new();
    for ev in history.iter().rev() {
        if seen.insert(ev.key.as_str()) {
            kept.push(ev.clone());
        }
    }
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(key: &str, val: i64) -> BeliefEvent {
        BeliefEvent::new(key, json!(val), "")
    }

    #[test]
    fn test_latest_wins_order_preserved() {
        let history = vec![ev("a", 1), ev("b", 2), ev("a", 3)];
        assert_eq!(prune_history(&history), vec![ev("b", 2), ev("a", 3)]);
    }

    #[test]
    fn test_one_entry_per_key() {
        let history = vec![ev("a", 1), ev("a", 2), ev("b", 1), ev("c", 1), ev("b", 9), ev("a", 7)];
        let pruned = prune_history(&history);
        assert_eq!(pruned, vec![ev("c", 1), ev("b", 9), ev("a", 7)]);

        let mut keys: Vec<&str> = pruned.iter().map(|e| e.key.as_str()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), pruned.len());
    }

    #[test]
    fn test_empty_and_distinct() {
        assert!(prune_history(&[]).is_empty());
        let distinct = vec![ev("x", 1), ev("y", 2)];
        assert_eq!(prune_history(&distinct), distinct);
    }
}
