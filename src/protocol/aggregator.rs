//! Per-destination aggregation buffers dengan message combining.
//!
//! Semua serialize dilakukan langsung ke pre-allocated buffer milik
//! destination core; tidak ada alokasi di hot path setelah buffer
//! pertama untuk satu destination dibuat. Message berurutan yang share
//! handler, size, dan stride address yang konsisten digabung ke satu
//! header — untuk workload pointer-bump (size 0), satu descriptor 16
//! byte mewakili sampai 1023 pemanggilan remote.
//!
//! Flush menyerahkan `(dest, bytes)` ke transport lalu me-reset buffer.
//! Flush di buffer kosong adalah no-op.

use std::collections::BTreeMap;

use tracing::{error, trace};

use crate::core::GlobalAddress;
use crate::error::{Result, RuntimeError};
use crate::network::{CoreId, Transport};
use crate::protocol::header::{
    NtHeader, HEADER_SIZE, MAX_COMBINED_COUNT, MAX_MESSAGE_SIZE, MAX_STRIDE, MIN_STRIDE,
};
use crate::protocol::registry::{
    AddressedHandler, AddressedPayloadHandler, PayloadHandler, SimpleHandler,
};
use crate::protocol::shape::{
    capture_bytes, capture_fits_inline, inline_bits, payload_bytes, WireCopy,
};

/// Default capacity per destination buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Isi addr field untuk record yang akan ditulis.
enum RecordAddr {
    /// Shape tanpa target: nol, atau inline capture bits. Combinable
    /// hanya dengan predecessor yang bits-nya identik.
    Value(u64),
    /// Target byte offset; combinable lewat stride check.
    Target(i64),
}

/// Header yang terakhir ditulis, kandidat untuk combining.
#[derive(Clone, Copy)]
struct LastRecord {
    at: usize,
    header: NtHeader,
    targeted: bool,
}

/// Output buffer untuk satu destination.
struct AggregationBuffer {
    buf: Box<[u8]>,
    write_pos: usize,
    last: Option<LastRecord>,
}

impl AggregationBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            write_pos: 0,
            last: None,
        }
    }

    /// Serahkan isi buffer ke transport, lalu reset. No-op jika kosong.
    fn flush_into<Tp: Transport>(&mut self, dest: CoreId, transport: &mut Tp) -> Result<()> {
        if self.write_pos == 0 {
            return Ok(());
        }
        transport
            .send(dest, &self.buf[..self.write_pos])
            .map_err(RuntimeError::Transport)?;
        trace!(dest = dest.0, bytes = self.write_pos, "flushed buffer");
        self.write_pos = 0;
        self.last = None;
        Ok(())
    }
}

/// Kumpulan aggregation buffer, satu per destination, dibuat lazy pada
/// send pertama.
pub struct Aggregator {
    capacity: usize,
    buffers: BTreeMap<CoreId, AggregationBuffer>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl Aggregator {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > HEADER_SIZE, "capacity must hold at least one header");
        Self {
            capacity,
            buffers: BTreeMap::new(),
        }
    }

    /// Shape 0: tanpa address, tanpa payload.
    pub fn send_simple<C: WireCopy, Tp: Transport>(
        &mut self,
        dest: CoreId,
        handler: SimpleHandler<C>,
        capture: &C,
        transport: &mut Tp,
    ) -> Result<()> {
        if capture_fits_inline::<C>() {
            let bits = inline_bits(capture);
            self.push_record(dest, handler.code(), RecordAddr::Value(bits), &[], &[], transport)
        } else {
            self.push_record(
                dest,
                handler.code(),
                RecordAddr::Value(0),
                capture_bytes(capture),
                &[],
                transport,
            )
        }
    }

    /// Shape 1: dengan target address. Destination diturunkan dari home
    /// core milik address.
    pub fn send_addressed<T: 'static, C: WireCopy, Tp: Transport>(
        &mut self,
        addr: GlobalAddress<T>,
        handler: AddressedHandler<T, C>,
        capture: &C,
        transport: &mut Tp,
    ) -> Result<()> {
        self.push_record(
            addr.core(),
            handler.code(),
            RecordAddr::Target(addr.offset() as i64),
            capture_bytes(capture),
            &[],
            transport,
        )
    }

    /// Shape 2: dengan payload, tanpa address. Payload di-copy, jadi
    /// buffer caller langsung bisa dipakai lagi.
    pub fn send_payload<C: WireCopy, P: WireCopy, Tp: Transport>(
        &mut self,
        dest: CoreId,
        handler: PayloadHandler<C, P>,
        capture: &C,
        payload: &[P],
        transport: &mut Tp,
    ) -> Result<()> {
        if capture_fits_inline::<C>() {
            let bits = inline_bits(capture);
            self.push_record(
                dest,
                handler.code(),
                RecordAddr::Value(bits),
                &[],
                payload_bytes(payload),
                transport,
            )
        } else {
            self.push_record(
                dest,
                handler.code(),
                RecordAddr::Value(0),
                capture_bytes(capture),
                payload_bytes(payload),
                transport,
            )
        }
    }

    /// Shape 3: dengan address dan payload.
    pub fn send_addressed_payload<T: 'static, C: WireCopy, P: WireCopy, Tp: Transport>(
        &mut self,
        addr: GlobalAddress<T>,
        handler: AddressedPayloadHandler<T, C, P>,
        capture: &C,
        payload: &[P],
        transport: &mut Tp,
    ) -> Result<()> {
        self.push_record(
            addr.core(),
            handler.code(),
            RecordAddr::Target(addr.offset() as i64),
            capture_bytes(capture),
            payload_bytes(payload),
            transport,
        )
    }

    /// Force-drain buffer milik satu destination.
    pub fn flush<Tp: Transport>(&mut self, dest: CoreId, transport: &mut Tp) -> Result<()> {
        match self.buffers.get_mut(&dest) {
            Some(buffer) => buffer.flush_into(dest, transport),
            None => Ok(()),
        }
    }

    /// Force-drain semua buffer, ascending destination order.
    pub fn flush_all<Tp: Transport>(&mut self, transport: &mut Tp) -> Result<()> {
        for (&dest, buffer) in self.buffers.iter_mut() {
            buffer.flush_into(dest, transport)?;
        }
        Ok(())
    }

    /// Bytes yang belum di-flush untuk satu destination.
    pub fn pending(&self, dest: CoreId) -> &[u8] {
        self.buffers
            .get(&dest)
            .map(|b| &b.buf[..b.write_pos])
            .unwrap_or(&[])
    }

    /// Append protocol: combine dengan predecessor kalau legal, kalau
    /// tidak tulis header baru (flush dulu bila perlu).
    fn push_record<Tp: Transport>(
        &mut self,
        dest: CoreId,
        fp: u32,
        addr: RecordAddr,
        capture: &[u8],
        payload: &[u8],
        transport: &mut Tp,
    ) -> Result<()> {
        let size = capture.len() + payload.len();
        if size > MAX_MESSAGE_SIZE {
            error!(bytes = size, "per-iteration bytes exceed the wire size field");
            return Err(RuntimeError::MessageTooLarge { bytes: size });
        }
        let needed = HEADER_SIZE + size;
        if needed > self.capacity {
            error!(
                needed,
                capacity = self.capacity,
                "aggregation buffer smaller than a single record"
            );
            return Err(RuntimeError::BufferOverflow {
                needed,
                capacity: self.capacity,
            });
        }

        let capacity = self.capacity;
        let buffer = self
            .buffers
            .entry(dest)
            .or_insert_with(|| AggregationBuffer::new(capacity));

        if Self::try_combine(buffer, fp, &addr, size) {
            let at = buffer.write_pos;
            buffer.buf[at..at + capture.len()].copy_from_slice(capture);
            buffer.buf[at + capture.len()..at + size].copy_from_slice(payload);
            buffer.write_pos += size;
            return Ok(());
        }

        if buffer.write_pos + needed > buffer.buf.len() {
            buffer.flush_into(dest, transport)?;
        }

        let mut header = NtHeader::new(dest, fp, size as u16);
        let targeted = match addr {
            RecordAddr::Value(bits) => {
                header.set_addr_bits(bits);
                false
            }
            RecordAddr::Target(offset) => {
                header.set_addr(offset);
                true
            }
        };

        let at = buffer.write_pos;
        header.write_to(&mut buffer.buf[at..at + HEADER_SIZE]);
        buffer.buf[at + HEADER_SIZE..at + HEADER_SIZE + capture.len()].copy_from_slice(capture);
        buffer.buf[at + HEADER_SIZE + capture.len()..at + needed].copy_from_slice(payload);
        buffer.write_pos = at + needed;
        buffer.last = Some(LastRecord {
            at,
            header,
            targeted,
        });
        Ok(())
    }

    /// Combining legal jika predecessor adalah write terakhir, fp dan
    /// size sama, count belum penuh, stride konsisten (shape dengan
    /// target), dan hasil gabungan masih muat.
    fn try_combine(
        buffer: &mut AggregationBuffer,
        fp: u32,
        addr: &RecordAddr,
        size: usize,
    ) -> bool {
        let LastRecord {
            at,
            mut header,
            targeted,
        } = match buffer.last {
            Some(last) => last,
            None => return false,
        };

        if header.fp() != fp || header.size() as usize != size {
            return false;
        }
        if header.count() >= MAX_COMBINED_COUNT {
            return false;
        }
        if buffer.write_pos + size > buffer.buf.len() {
            return false;
        }

        match addr {
            RecordAddr::Value(bits) => {
                // Inline capture (atau nol) harus identik; kalau tidak,
                // menggabung akan menimpa capture milik message kedua.
                if targeted || header.addr_bits() != *bits {
                    return false;
                }
            }
            RecordAddr::Target(new_addr) => {
                if !targeted {
                    return false;
                }
                let count = header.count() as i64;
                let delta = new_addr - header.addr() - (count - 1) * header.offset();
                if count == 1 {
                    // Predecessor tunggal: stride apapun yang muat di
                    // signed 10 bit jadi stride baru.
                    if !(MIN_STRIDE..=MAX_STRIDE).contains(&delta) {
                        return false;
                    }
                    header.set_offset(delta);
                } else if delta != header.offset() {
                    return false;
                }
            }
        }

        header.set_count(header.count() + 1);
        header.write_to(&mut buffer.buf[at..at + HEADER_SIZE]);
        buffer.last = Some(LastRecord {
            at,
            header,
            targeted,
        });
        true
    }
}
