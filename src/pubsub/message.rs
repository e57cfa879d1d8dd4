use std::sync::Arc;

use bytes::Bytes;

/// Сообщение в том виде, в каком его доставляет соединение с брокером.
///
/// `pattern` заполнен, если сообщение пришло по подписке на шаблон;
/// `channel` всегда содержит конкретный канал публикации.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub pattern: Option<Arc<str>>,
    pub channel: Arc<str>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        channel: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            pattern: None,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn with_pattern(
        pattern: impl Into<Arc<str>>,
        channel: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            pattern: Some(pattern.into()),
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn is_pattern(&self) -> bool {
        self.pattern.is_some()
    }
}
