//! Per-core runtime facade.
//!
//! Satu `Core` per system thread: memiliki heap lokal, aggregation
//! buffers, dan transport; registry dishare read-only lewat `Arc`.
//! Semua API non-suspending kecuali `send_*` saat buffer penuh dan
//! transport menahan flush (backpressure).
//!
//! Shutdown = `flush()` di semua core, drain `poll()`, lalu drop.

use std::sync::Arc;

use crate::core::{AllocatorStats, GlobalAddress, GlobalHeap};
use crate::error::Result;
use crate::network::{CoreId, Transport};
use crate::protocol::aggregator::{Aggregator, DEFAULT_BUFFER_CAPACITY};
use crate::protocol::dispatch::dispatch_buffer;
use crate::protocol::registry::{
    AddressedHandler, AddressedPayloadHandler, HandlerRegistry, PayloadHandler, SimpleHandler,
};
use crate::protocol::shape::WireCopy;

/// Konfigurasi satu core. Harness aplikasi yang menentukan nilainya;
/// default cukup untuk test dan demo.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    /// Ukuran slice lokal dari global heap, dalam bytes.
    pub heap_bytes: usize,
    /// Kapasitas aggregation buffer per destination.
    pub buffer_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            heap_bytes: 16 * 1024 * 1024,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Runtime state milik satu logical core.
pub struct Core<Tp: Transport> {
    transport: Tp,
    registry: Arc<HandlerRegistry>,
    heap: GlobalHeap,
    aggregator: Aggregator,
}

impl<Tp: Transport> Core<Tp> {
    /// Membuat core di atas transport yang sudah terhubung. Registry
    /// harus sudah final — registrasi setelah ini tidak terlihat.
    pub fn new(transport: Tp, registry: Arc<HandlerRegistry>, config: CoreConfig) -> Result<Self> {
        let home = transport.this_core();
        Ok(Self {
            heap: GlobalHeap::new(home, config.heap_bytes)?,
            aggregator: Aggregator::new(config.buffer_capacity),
            transport,
            registry,
        })
    }

    #[inline(always)]
    pub fn this_core(&self) -> CoreId {
        self.transport.this_core()
    }

    /// Reserve `n` elemen `T` di heap lokal; address-nya boleh dikirim
    /// ke core lain.
    pub fn global_alloc<T>(&mut self, n: usize) -> Result<GlobalAddress<T>> {
        self.heap.alloc(n)
    }

    /// Release allocation yang homed di core ini.
    pub fn global_free<T>(&mut self, addr: GlobalAddress<T>) -> Result<()> {
        self.heap.free(addr)
    }

    /// Baca cell lokal. Address remote menghasilkan error; baca remote
    /// harus delegate lewat message ke home core.
    #[inline(always)]
    pub fn get<T: Copy>(&self, addr: GlobalAddress<T>) -> Result<T> {
        self.heap.get(addr)
    }

    /// Tulis cell lokal. Aturan home core sama dengan [`get`](Self::get).
    #[inline(always)]
    pub fn put<T: Copy>(&mut self, addr: GlobalAddress<T>, value: T) -> Result<()> {
        self.heap.put(addr, value)
    }

    /// Shape 0: handler saja.
    pub fn send_simple<C: WireCopy>(
        &mut self,
        dest: CoreId,
        handler: SimpleHandler<C>,
        capture: &C,
    ) -> Result<()> {
        self.aggregator
            .send_simple(dest, handler, capture, &mut self.transport)
    }

    /// Shape 1: handler menerima pointer ke cell target di home core.
    pub fn send_addressed<T: 'static, C: WireCopy>(
        &mut self,
        addr: GlobalAddress<T>,
        handler: AddressedHandler<T, C>,
        capture: &C,
    ) -> Result<()> {
        self.aggregator
            .send_addressed(addr, handler, capture, &mut self.transport)
    }

    /// Shape 2: handler menerima payload copy.
    pub fn send_payload<C: WireCopy, P: WireCopy>(
        &mut self,
        dest: CoreId,
        handler: PayloadHandler<C, P>,
        capture: &C,
        payload: &[P],
    ) -> Result<()> {
        self.aggregator
            .send_payload(dest, handler, capture, payload, &mut self.transport)
    }

    /// Shape 3: address + payload.
    pub fn send_addressed_payload<T: 'static, C: WireCopy, P: WireCopy>(
        &mut self,
        addr: GlobalAddress<T>,
        handler: AddressedPayloadHandler<T, C, P>,
        capture: &C,
        payload: &[P],
    ) -> Result<()> {
        self.aggregator
            .send_addressed_payload(addr, handler, capture, payload, &mut self.transport)
    }

    /// Force-drain semua aggregation buffer ke transport.
    pub fn flush(&mut self) -> Result<()> {
        self.aggregator.flush_all(&mut self.transport)
    }

    /// Drain buffer masuk dan jalankan handler-nya. Returns jumlah
    /// pemanggilan handler. Tidak pernah suspend.
    pub fn poll(&mut self) -> Result<usize> {
        let mut invoked = 0;
        while let Some(buf) = self.transport.recv_poll() {
            invoked += dispatch_buffer(&self.registry, &buf, self.heap.base_ptr())?;
        }
        Ok(invoked)
    }

    /// Statistik allocator heap lokal.
    pub fn heap_stats(&self) -> AllocatorStats {
        self.heap.stats()
    }

    /// Akses transport, mis. untuk mem-pump exchange event loop.
    pub fn transport_mut(&mut self) -> &mut Tp {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::loopback_fabric;

    fn bump(amount: &i64, cell: *mut i64) {
        // SAFETY: cell points into the owning core's region.
        unsafe { *cell += *amount };
    }

    #[test]
    fn test_cross_core_increment() {
        let mut registry = HandlerRegistry::new();
        let h = registry.register_addressed(bump).unwrap();
        let registry = Arc::new(registry);

        let mut fabric = loopback_fabric(2);
        let ep1 = fabric.pop().unwrap();
        let ep0 = fabric.pop().unwrap();

        let config = CoreConfig {
            heap_bytes: 1 << 16,
            ..CoreConfig::default()
        };
        let mut core0 = Core::new(ep0, registry.clone(), config).unwrap();
        let mut core1 = Core::new(ep1, registry, config).unwrap();

        let cells: GlobalAddress<i64> = core0.global_alloc(8).unwrap();
        for i in 0..8 {
            core0.put(cells + i, 0).unwrap();
        }

        // Core 1 bumps every cell on core 0 twice.
        for round in 0..2 {
            for i in 0..8u64 {
                core1.send_addressed(cells + i, h, &(round + 1)).unwrap();
            }
        }
        core1.flush().unwrap();

        let invoked = core0.poll().unwrap();
        assert_eq!(invoked, 16);
        for i in 0..8 {
            assert_eq!(core0.get(cells + i).unwrap(), 3);
        }
    }

    #[test]
    fn test_flush_without_sends_is_noop() {
        let registry = Arc::new(HandlerRegistry::new());
        let mut fabric = loopback_fabric(1);
        let mut core0 = Core::new(
            fabric.pop().unwrap(),
            registry,
            CoreConfig {
                heap_bytes: 4096,
                ..CoreConfig::default()
            },
        )
        .unwrap();

        core0.flush().unwrap();
        assert_eq!(core0.poll().unwrap(), 0);
    }
}
