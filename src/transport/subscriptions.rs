use std::collections::HashMap;

use bytes::Bytes;

use super::PeerId;

/// Маркер подписки в control-фрейме.
pub const SUBSCRIBE_MARKER: u8 = 1;
/// Маркер отписки в control-фрейме.
pub const UNSUBSCRIBE_MARKER: u8 = 0;

/// Собирает control-фрейм `marker | topic`.
pub fn control_frame(
    marker: u8,
    topic: &[u8],
) -> Bytes {
    let mut frame = Vec::with_capacity(topic.len() + 1);
    frame.push(marker);
    frame.extend_from_slice(topic);
    Bytes::from(frame)
}

/// Фильтр, снятый при удалении пира.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedTopic {
    pub topic: Bytes,
    /// Сколько подписок на топик держал пир
    pub held: usize,
    /// У топика не осталось подписчиков
    pub orphaned: bool,
}

/// Мультимножество топиков-префиксов со счётчиками.
#[derive(Debug, Default, Clone)]
pub struct TopicSet {
    counts: HashMap<Bytes, usize>,
}

impl TopicSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет топик. Возвращает `true`, если он появился впервые.
    pub fn add(
        &mut self,
        topic: Bytes,
    ) -> bool {
        let count = self.counts.entry(topic).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Убирает одно вхождение топика. Возвращает `true`, если топик исчез
    /// полностью.
    pub fn remove(
        &mut self,
        topic: &[u8],
    ) -> bool {
        match self.counts.get_mut(topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(topic);
                true
            }
            None => false,
        }
    }

    /// Проверяет, что хотя бы один топик является префиксом `data`.
    pub fn matches(
        &self,
        data: &[u8],
    ) -> bool {
        self.counts.keys().any(|topic| data.starts_with(topic))
    }

    pub fn contains(
        &self,
        topic: &[u8],
    ) -> bool {
        self.counts.contains_key(topic)
    }

    /// Сколько раз добавлен топик.
    pub fn count(
        &self,
        topic: &[u8],
    ) -> usize {
        self.counts.get(topic).copied().unwrap_or(0)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Bytes> {
        self.counts.keys()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Таблица фильтров подписчиков XPUB-сокета.
///
/// Хранит фильтры каждого пира и общее число пиров на каждый топик, чтобы
/// отличать первую подписку на топик и уход последнего подписчика.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    peers: HashMap<PeerId, TopicSet>,
    totals: TopicSet,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует фильтр пира. Возвращает `true`, если это первый
    /// подписчик топика среди всех пиров.
    pub fn subscribe(
        &mut self,
        peer: PeerId,
        topic: Bytes,
    ) -> bool {
        let fresh_for_peer = self.peers.entry(peer).or_default().add(topic.clone());
        fresh_for_peer && self.totals.add(topic)
    }

    /// Снимает фильтр пира. Возвращает `true`, если у топика не осталось
    /// подписчиков.
    pub fn unsubscribe(
        &mut self,
        peer: PeerId,
        topic: &[u8],
    ) -> bool {
        let gone_for_peer = match self.peers.get_mut(&peer) {
            Some(set) => set.remove(topic),
            None => false,
        };
        gone_for_peer && self.totals.remove(topic)
    }

    /// Держит ли пир фильтр `topic`.
    pub fn holds(
        &self,
        peer: PeerId,
        topic: &[u8],
    ) -> bool {
        self.peers
            .get(&peer)
            .is_some_and(|set| set.contains(topic))
    }

    /// Удаляет все фильтры пира.
    ///
    /// # Возвращает
    /// Каждый снятый топик с числом подписок пира и признаком того, что
    /// подписчиков у топика больше нет.
    pub fn remove_peer(
        &mut self,
        peer: PeerId,
    ) -> Vec<ReleasedTopic> {
        let Some(set) = self.peers.remove(&peer) else {
            return Vec::new();
        };
        set.counts
            .into_iter()
            .map(|(topic, held)| {
                let orphaned = self.totals.remove(&topic);
                ReleasedTopic {
                    topic,
                    held,
                    orphaned,
                }
            })
            .collect()
    }

    /// Проверяет, подписан ли пир на данные с первым фреймом `topic`.
    pub fn matches(
        &self,
        peer: PeerId,
        topic: &[u8],
    ) -> bool {
        self.peers
            .get(&peer)
            .is_some_and(|set| set.matches(topic))
    }

    /// Количество различных топиков среди всех пиров.
    pub fn topic_count(&self) -> usize {
        self.totals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_control_frame_layout() {
        assert_eq!(&control_frame(SUBSCRIBE_MARKER, b"news")[..], b"\x01news");
        assert_eq!(&control_frame(UNSUBSCRIBE_MARKER, b"")[..], b"\x00");
    }

    #[test]
    fn test_topic_set_counts() {
        let mut set = TopicSet::new();
        assert!(set.add(b("a")));
        assert!(!set.add(b("a")));
        assert!(!set.remove(b"a"));
        assert!(set.remove(b"a"));
        assert!(!set.remove(b"a"));
        assert!(set.is_empty());
    }

    /// Тест проверяет префиксное сопоставление и пустой топик
    /// («подписка на всё»).
    #[test]
    fn test_prefix_matching() {
        let mut set = TopicSet::new();
        set.add(b("user."));
        assert!(set.matches(b"user.login"));
        assert!(!set.matches(b"admin.login"));
        set.add(b(""));
        assert!(set.matches(b"admin.login"));
    }

    /// Тест проверяет, что первая подписка и последняя отписка
    /// определяются по всем пирам.
    #[test]
    fn test_table_transitions_across_peers() {
        let mut table = SubscriptionTable::new();
        assert!(table.subscribe(1, b("t")));
        assert!(!table.subscribe(2, b("t")));
        assert!(!table.subscribe(1, b("t")));

        assert!(!table.unsubscribe(2, b"t"));
        assert!(!table.unsubscribe(1, b"t"));
        assert!(table.unsubscribe(1, b"t"));
        assert_eq!(table.topic_count(), 0);
    }

    #[test]
    fn test_remove_peer_reports_orphaned_topics() {
        let mut table = SubscriptionTable::new();
        table.subscribe(1, b("shared"));
        table.subscribe(2, b("shared"));
        table.subscribe(1, b("solo"));

        let mut released = table.remove_peer(1);
        released.sort_by(|a, b| a.topic.cmp(&b.topic));
        assert_eq!(
            released,
            vec![
                ReleasedTopic {
                    topic: b("shared"),
                    held: 1,
                    orphaned: false
                },
                ReleasedTopic {
                    topic: b("solo"),
                    held: 1,
                    orphaned: true
                },
            ]
        );
        assert!(table.matches(2, b"shared.x"));
        assert!(!table.matches(1, b"shared.x"));
        assert!(table.remove_peer(42).is_empty());
    }

    /// Тест проверяет, что повторные подписки пира учитываются при его
    /// удалении.
    #[test]
    fn test_remove_peer_reports_repeated_subscriptions() {
        let mut table = SubscriptionTable::new();
        table.subscribe(1, b("t"));
        table.subscribe(1, b("t"));
        assert!(table.holds(1, b"t"));
        assert!(!table.holds(2, b"t"));

        let released = table.remove_peer(1);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].held, 2);
        assert!(released[0].orphaned);
    }
}
