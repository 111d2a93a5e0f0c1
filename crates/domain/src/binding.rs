use std::collections::HashMap;

use messaging_errors::{MessagingError, MessagingResult};

use crate::entities::WILDCARD_ROUTING_KEY;

/// 交换机绑定的标识：消息类型名（交换机名）加路由键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub kind: String,
    pub routing_key: String,
}

impl BindingKey {
    pub fn new(kind: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            routing_key: routing_key.into(),
        }
    }

    /// 该绑定是否命中给定消息
    ///
    /// 命中条件：绑定类型属于消息声明的类型集合，且路由键完全相等
    /// 或绑定使用通配符。
    pub fn matches(&self, kinds: &[String], routing_key: &str) -> bool {
        kinds.iter().any(|k| k == &self.kind)
            && (self.routing_key == routing_key || self.routing_key == WILDCARD_ROUTING_KEY)
    }
}

/// 绑定表：(消息类型, 路由键) -> 处理器名称集合
///
/// broker路径与进程内回环路径共用同一份匹配语义。
/// 处理器集合按插入顺序保存并去重；按处理器移除时保留空条目。
#[derive(Debug, Default)]
pub struct BindingTable {
    entries: HashMap<BindingKey, Vec<String>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// 注册一个新的消息类型绑定，重复注册视为编程错误
    pub fn add_message_type(&mut self, key: BindingKey) -> MessagingResult<()> {
        if self.entries.contains_key(&key) {
            return Err(MessagingError::DuplicateBinding {
                kind: key.kind,
                routing_key: key.routing_key,
            });
        }
        self.entries.insert(key, Vec::new());
        Ok(())
    }

    /// 精确键的处理器集合，未注册时报错
    pub fn handlers(&self, key: &BindingKey) -> MessagingResult<&[String]> {
        self.entries
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| MessagingError::BindingNotRegistered {
                kind: key.kind.clone(),
                routing_key: key.routing_key.clone(),
            })
    }

    /// 覆盖精确键的处理器集合
    pub fn set_handlers(&mut self, key: BindingKey, handlers: Vec<String>) {
        self.entries.insert(key, handlers);
    }

    pub fn is_message_registered(&self, key: &BindingKey) -> bool {
        self.entries.contains_key(key)
    }

    /// 精确键的处理器快照，未注册时返回空集合
    pub fn for_message(&self, kind: &str, routing_key: &str) -> Vec<String> {
        let key = BindingKey::new(kind, routing_key);
        self.entries.get(&key).cloned().unwrap_or_default()
    }

    /// 向已有绑定追加处理器，重复添加是空操作
    pub fn add_handler(&mut self, key: &BindingKey, handler: &str) -> MessagingResult<()> {
        let handlers =
            self.entries
                .get_mut(key)
                .ok_or_else(|| MessagingError::BindingNotRegistered {
                    kind: key.kind.clone(),
                    routing_key: key.routing_key.clone(),
                })?;
        if !handlers.iter().any(|h| h == handler) {
            handlers.push(handler.to_string());
        }
        Ok(())
    }

    /// 从所有绑定中移除处理器，条目本身保留
    pub fn remove_handler(&mut self, handler: &str) {
        for handlers in self.entries.values_mut() {
            handlers.retain(|h| h != handler);
        }
    }

    /// 已注册的全部处理器名称，去重
    pub fn all_handlers(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for handlers in self.entries.values() {
            for handler in handlers {
                if !names.iter().any(|n| n == handler) {
                    names.push(handler.clone());
                }
            }
        }
        names
    }

    /// 评估全部条目，返回命中消息的绑定键
    ///
    /// 一条消息可以命中多个绑定，向所有命中绑定的处理器扇出。
    pub fn matching(&self, kinds: &[String], routing_key: &str) -> Vec<BindingKey> {
        self.entries
            .keys()
            .filter(|key| key.matches(kinds, routing_key))
            .cloned()
            .collect()
    }

    pub fn registered_keys(&self) -> Vec<BindingKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let mut table = BindingTable::new();
        let key = BindingKey::new("colour-message", "#");

        table.add_message_type(key.clone()).unwrap();
        let err = table.add_message_type(key).unwrap_err();

        assert!(matches!(err, MessagingError::DuplicateBinding { .. }));
    }

    #[test]
    fn test_handlers_for_unregistered_key_is_an_error() {
        let table = BindingTable::new();
        let key = BindingKey::new("colour-message", "");

        assert!(table.handlers(&key).is_err());
        assert!(!table.is_message_registered(&key));
    }

    #[test]
    fn test_add_handler_is_insertion_deduplicated() {
        let mut table = BindingTable::new();
        let key = BindingKey::new("colour-message", "");
        table.add_message_type(key.clone()).unwrap();

        table.add_handler(&key, "ColourHandler").unwrap();
        table.add_handler(&key, "ColourHandler").unwrap();
        table.add_handler(&key, "OtherHandler").unwrap();

        assert_eq!(table.handlers(&key).unwrap(), ["ColourHandler", "OtherHandler"]);
    }

    #[test]
    fn test_remove_handler_keeps_empty_entry() {
        let mut table = BindingTable::new();
        let key_a = BindingKey::new("colour-message", "");
        let key_b = BindingKey::new("villain-message", "#");
        table.add_message_type(key_a.clone()).unwrap();
        table.add_message_type(key_b.clone()).unwrap();
        table.add_handler(&key_a, "SharedHandler").unwrap();
        table.add_handler(&key_b, "SharedHandler").unwrap();
        table.add_handler(&key_b, "OtherHandler").unwrap();

        table.remove_handler("SharedHandler");

        assert!(table.is_message_registered(&key_a));
        assert!(table.handlers(&key_a).unwrap().is_empty());
        assert_eq!(table.handlers(&key_b).unwrap(), ["OtherHandler"]);
    }

    #[test]
    fn test_wildcard_binding_matches_every_routing_key() {
        let mut table = BindingTable::new();
        table
            .add_message_type(BindingKey::new("colour-message", "#"))
            .unwrap();

        let message_kinds = kinds(&["green-message", "colour-message"]);

        assert_eq!(table.matching(&message_kinds, "").len(), 1);
        assert_eq!(table.matching(&message_kinds, "routingKey").len(), 1);
        assert_eq!(table.matching(&message_kinds, "anything.else").len(), 1);
    }

    #[test]
    fn test_exact_binding_matches_only_its_own_key() {
        let mut table = BindingTable::new();
        table
            .add_message_type(BindingKey::new("villain-message", "routingKey"))
            .unwrap();

        let message_kinds = kinds(&["batman-message", "villain-message"]);

        assert_eq!(table.matching(&message_kinds, "routingKey").len(), 1);
        assert!(table.matching(&message_kinds, "foo").is_empty());
        assert!(table.matching(&message_kinds, "").is_empty());
    }

    #[test]
    fn test_matching_requires_declared_kind() {
        let mut table = BindingTable::new();
        table
            .add_message_type(BindingKey::new("colour-message", "#"))
            .unwrap();

        assert!(table.matching(&kinds(&["batman-message"]), "").is_empty());
    }

    #[test]
    fn test_exact_and_wildcard_bindings_can_coexist() {
        let mut table = BindingTable::new();
        table
            .add_message_type(BindingKey::new("colour-message", "#"))
            .unwrap();
        table
            .add_message_type(BindingKey::new("colour-message", "routingKey"))
            .unwrap();

        let message_kinds = kinds(&["green-message", "colour-message"]);

        assert_eq!(table.matching(&message_kinds, "routingKey").len(), 2);
        assert_eq!(table.matching(&message_kinds, "other").len(), 1);
    }

    #[test]
    fn test_for_message_returns_exact_pair_only() {
        let mut table = BindingTable::new();
        let exact = BindingKey::new("colour-message", "routingKey");
        table.add_message_type(exact.clone()).unwrap();
        table.add_handler(&exact, "ColourHandler").unwrap();

        assert_eq!(table.for_message("colour-message", "routingKey"), ["ColourHandler"]);
        assert!(table.for_message("colour-message", "#").is_empty());
        assert!(table.for_message("colour-message", "").is_empty());
    }
}
