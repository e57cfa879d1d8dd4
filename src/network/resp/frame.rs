use bytes::Bytes;

/// Одно значение RESP2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespFrame {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` означает null bulk-строку (`$-1`).
    Bulk(Option<Bytes>),
    /// `None` означает null-массив (`*-1`).
    Array(Option<Vec<RespFrame>>),
}

/// Внеочередные кадры, которые получает подписанное соединение.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    Message {
        channel: Bytes,
        payload: Bytes,
    },
    PMessage {
        pattern: Bytes,
        channel: Bytes,
        payload: Bytes,
    },
}

impl RespFrame {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespFrame::Bulk(Some(data.into()))
    }

    /// Байты bulk- или простой строки.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            RespFrame::Bulk(Some(b)) => Some(b.clone()),
            RespFrame::Simple(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespFrame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Распознаёт push-сообщения `message` и `pmessage`.
    ///
    /// Подтверждения подписки и отписки тоже массивы, но это ответы на
    /// ожидающие команды, а не push.
    pub fn as_push(&self) -> Option<Push> {
        let RespFrame::Array(Some(items)) = self else {
            return None;
        };
        let kind = items.first()?.as_bytes()?;
        match (kind.as_ref(), items.len()) {
            (b"message", 3) => Some(Push::Message {
                channel: items[1].as_bytes()?,
                payload: items[2].as_bytes()?,
            }),
            (b"pmessage", 4) => Some(Push::PMessage {
                pattern: items[1].as_bytes()?,
                channel: items[2].as_bytes()?,
                payload: items[3].as_bytes()?,
            }),
            _ => None,
        }
    }
}
