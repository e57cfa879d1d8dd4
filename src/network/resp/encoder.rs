use bytes::{BufMut, Bytes, BytesMut};

use super::RespFrame;

/// Кодировщик RESP2.
pub struct RespEncoder;

impl RespEncoder {
    /// Кодирует команду как массив bulk-строк; клиенты шлют только такую
    /// форму.
    pub fn command<I, A>(args: I) -> Bytes
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let args: Vec<A> = args.into_iter().collect();
        let mut out = BytesMut::with_capacity(16 + args.len() * 16);
        out.put_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in &args {
            put_bulk(&mut out, arg.as_ref());
        }
        out.freeze()
    }

    /// Кодирует любой кадр. Нужен тестовым двойникам на стороне брокера.
    pub fn encode(frame: &RespFrame) -> Bytes {
        let mut out = BytesMut::new();
        Self::encode_into(frame, &mut out);
        out.freeze()
    }

    fn encode_into(
        frame: &RespFrame,
        out: &mut BytesMut,
    ) {
        match frame {
            RespFrame::Simple(s) => out.put_slice(format!("+{s}\r\n").as_bytes()),
            RespFrame::Error(s) => out.put_slice(format!("-{s}\r\n").as_bytes()),
            RespFrame::Integer(i) => out.put_slice(format!(":{i}\r\n").as_bytes()),
            RespFrame::Bulk(Some(b)) => put_bulk(out, b),
            RespFrame::Bulk(None) => out.put_slice(b"$-1\r\n"),
            RespFrame::Array(None) => out.put_slice(b"*-1\r\n"),
            RespFrame::Array(Some(items)) => {
                out.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    Self::encode_into(item, out);
                }
            }
        }
    }
}

fn put_bulk(
    out: &mut BytesMut,
    data: &[u8],
) {
    out.put_slice(format!("${}\r\n", data.len()).as_bytes());
    out.put_slice(data);
    out.put_slice(b"\r\n");
}
