//! Receive-side dispatch: linear scan dari buffer yang diterima.
//!
//! Buffer adalah concatenation dari record `[header][block × count]`.
//! Per header: lookup handler code, bounds check, panggil dispatch
//! thunk, maju sebesar record length. Scan selesai tepat di akhir
//! buffer; selisih apapun berarti data-plane corruption dan fatal.
//! Handler dijalankan sampai selesai tanpa suspension, urut sesuai
//! arrival order.

use tracing::error;

use crate::error::{Result, RuntimeError};
use crate::protocol::header::{NtHeader, HEADER_SIZE};
use crate::protocol::registry::HandlerRegistry;

/// Jalankan semua record di `buf` terhadap heap lokal `base`.
///
/// Returns total pemanggilan handler (jumlah `count` semua header).
pub fn dispatch_buffer(registry: &HandlerRegistry, buf: &[u8], base: *mut u8) -> Result<usize> {
    let mut cursor = 0usize;
    let mut invoked = 0usize;

    while cursor < buf.len() {
        if cursor + HEADER_SIZE > buf.len() {
            error!(at = cursor, "torn header at end of buffer");
            return Err(RuntimeError::TruncatedBuffer { at: cursor });
        }
        let header = NtHeader::read_from(&buf[cursor..cursor + HEADER_SIZE]);

        let entry = match registry.entry(header.fp()) {
            Some(entry) => entry,
            None => {
                error!(code = header.fp(), at = cursor, "unknown handler code");
                return Err(RuntimeError::UnknownHandler { code: header.fp() });
            }
        };

        let body_len = header.count() as usize * header.size() as usize;
        let end = cursor + HEADER_SIZE + body_len;
        if end > buf.len() {
            error!(at = cursor, "record steps past the end of the buffer");
            return Err(RuntimeError::TruncatedBuffer { at: cursor });
        }

        (entry.dispatch)(entry, &header, &buf[cursor + HEADER_SIZE..end], base);
        invoked += header.count() as usize;
        cursor = end;
    }

    Ok(invoked)
}
