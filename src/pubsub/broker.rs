use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bytes::Bytes;
use dashmap::DashMap;
use globset::{GlobBuilder, GlobMatcher};
use redmux_error::{MuxError, MuxResult};
use tokio::sync::broadcast;

use super::Message;

type ChannelKey = Arc<str>;

/// Скомпилированный шаблон вместе с его `Sender`.
struct PatternEntry {
    matcher: GlobMatcher,
    tx: broadcast::Sender<Message>,
}

/// Брокер Pub/Sub сообщений внутри процесса.
///
/// Поддерживает:
/// - Точные подписки по имени канала
/// - Подписки по шаблонам (glob) с семантикой Redis (`*`, `?`, `[...]`,
///   экранирование `\`; `*` проходит через `.` и `/`)
/// - Автоматическое удаление каналов без слушателей
/// - Статистику публикаций и ошибок отправки
pub struct Broker {
    /// Точные каналы → `Sender`
    channels: DashMap<ChannelKey, broadcast::Sender<Message>>,
    /// Исходный текст шаблона → матчер и `Sender`
    patterns: DashMap<ChannelKey, PatternEntry>,
    /// Ёмкость буфера каждого `broadcast::channel`
    default_capacity: usize,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Количество публикаций в точный канал, у которого не осталось слушателей
    pub send_error_count: AtomicUsize,
}

/// Компилирует шаблон так, как Redis понимает аргументы PSUBSCRIBE.
pub fn compile_pattern(pattern: &str) -> MuxResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| MuxError::invalid(format!("invalid pattern '{pattern}': {e}")))
}

impl Broker {
    /// Создаёт новый `Broker` с заданной буферной ёмкостью канала.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            patterns: DashMap::new(),
            default_capacity: default_capacity.max(1),
            publish_count: AtomicUsize::new(0),
            send_error_count: AtomicUsize::new(0),
        }
    }

    /// Ёмкость буфера каждого канала.
    pub fn capacity(&self) -> usize {
        self.default_capacity
    }

    /// Подписка на конкретный канал (точное совпадение).
    ///
    /// Все подписчики одного канала делят один `Sender`.
    pub fn subscribe(
        &self,
        channel: &str,
    ) -> broadcast::Receiver<Message> {
        let key: Arc<str> = Arc::from(channel);
        self.channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.default_capacity).0)
            .subscribe()
    }

    /// Подписка по шаблону (glob), например `"room-*"` или `"a?c"`.
    pub fn psubscribe(
        &self,
        pattern: &str,
    ) -> MuxResult<broadcast::Receiver<Message>> {
        if let Some(entry) = self.patterns.get(pattern) {
            return Ok(entry.tx.subscribe());
        }
        let matcher = compile_pattern(pattern)?;
        let key: Arc<str> = Arc::from(pattern);
        let rx = self
            .patterns
            .entry(key)
            .or_insert_with(|| PatternEntry {
                matcher,
                tx: broadcast::channel(self.default_capacity).0,
            })
            .tx
            .subscribe();
        Ok(rx)
    }

    /// Публикация сообщения в канал. Возвращает число получателей (точных и
    /// по шаблонам вместе).
    ///
    /// Если в точном канале не осталось подписчиков, увеличивает
    /// `send_error_count` и удаляет канал.
    pub fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        let mut reached = 0;

        // 1) точный канал
        let mut stale = None;
        if let Some(entry) = self.channels.get(channel) {
            let msg = Message::new(entry.key().clone(), payload.clone());
            match entry.value().send(msg) {
                Ok(n) => reached += n,
                Err(_) => {
                    self.send_error_count.fetch_add(1, Ordering::Relaxed);
                    stale = Some(entry.key().clone());
                }
            }
        }
        if let Some(key) = stale {
            self.channels
                .remove_if(&key, |_, tx| tx.receiver_count() == 0);
        }

        // 2) шаблоны
        let mut stale_patterns = Vec::new();
        for entry in self.patterns.iter() {
            if !entry.value().matcher.is_match(channel) {
                continue;
            }
            let msg = Message::with_pattern(entry.key().clone(), channel, payload.clone());
            match entry.value().tx.send(msg) {
                Ok(n) => reached += n,
                Err(_) => stale_patterns.push(entry.key().clone()),
            }
        }
        for key in stale_patterns {
            self.patterns
                .remove_if(&key, |_, e| e.tx.receiver_count() == 0);
        }

        reached
    }

    /// Число получателей точного канала.
    pub fn subscriber_count(
        &self,
        channel: &str,
    ) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Число получателей шаблона.
    pub fn pattern_subscriber_count(
        &self,
        pattern: &str,
    ) -> usize {
        self.patterns
            .get(pattern)
            .map(|e| e.tx.receiver_count())
            .unwrap_or(0)
    }

    /// Удаляет все подписки на канал; получатели увидят `Closed`.
    pub fn unsubscribe_all(
        &self,
        channel: &str,
    ) {
        self.channels.remove(channel);
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(1024)
    }
}
