//! Handler registry: kompresi function pointer jadi 31-bit code.
//!
//! Setiap peer me-link binary yang sama dan mendaftarkan handler dalam
//! urutan program-start yang sama, jadi code yang dihasilkan identik
//! dan bisa dipertukarkan lintas core. Registry dibangun sekali saat
//! init, read-only setelahnya, dan dishare lewat `Arc`.
//!
//! Registrasi memilih wire shape (termasuk inline-capture optimization)
//! dan menyimpan dispatch thunk yang di-monomorphize untuk tipe
//! capture/payload call site — satu code cukup untuk mengidentifikasi
//! handler body sekaligus layout on-wire-nya.

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::mem;

use tracing::error;

use crate::error::{Result, RuntimeError};
use crate::protocol::header::NtHeader;
use crate::protocol::shape::{self, WireCopy, WireShape};

/// 31-bit code space.
const MAX_CODES: u64 = (1 << 31) - 1;

/// Receive-side entry point: merekonstruksi argumen dan memanggil
/// handler `count` kali.
pub(crate) type DispatchFn = fn(&HandlerEntry, &NtHeader, &[u8], *mut u8);

/// Satu handler terdaftar beserta wire layout-nya.
pub(crate) struct HandlerEntry {
    /// Wire layout entry ini. Thunk sudah tahu layout-nya sendiri;
    /// field ini untuk reverse lookup dan diagnostik.
    #[allow(dead_code)]
    pub(crate) shape: WireShape,
    /// `size_of` tipe capture, juga untuk shape inline (wire size 0).
    pub(crate) capture_len: usize,
    /// Type-erased user fn pointer; thunk men-transmute balik ke tipe
    /// persis yang dipakai saat registrasi.
    pub(crate) handler: usize,
    pub(crate) dispatch: DispatchFn,
}

/// Process-wide map dua arah antara handler dan 31-bit code.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
    /// Reverse direction: (fn address, shape, fn type) -> code, supaya
    /// registrasi ulang handler yang sama menghasilkan code yang sama.
    codes: HashMap<(usize, WireShape, TypeId), u32>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Daftarkan handler tanpa address dan tanpa payload (shape 0).
    ///
    /// Capture `<= 5` bytes otomatis di-pack ke header addr bits.
    pub fn register_simple<C: WireCopy>(&mut self, handler: fn(&C)) -> Result<SimpleHandler<C>> {
        let (wire, dispatch): (WireShape, DispatchFn) = if shape::capture_fits_inline::<C>() {
            (WireShape::SimpleInline, shape::dispatch_simple_inline::<C>)
        } else {
            (WireShape::Simple, shape::dispatch_simple::<C>)
        };
        let code = self.intern(
            handler as usize,
            TypeId::of::<fn(&C)>(),
            wire,
            mem::size_of::<C>(),
            dispatch,
        )?;
        Ok(SimpleHandler {
            code,
            _marker: PhantomData,
        })
    }

    /// Daftarkan handler dengan target address (shape 1). Handler
    /// menerima pointer ke cell `T` di heap lokal.
    pub fn register_addressed<T: 'static, C: WireCopy>(
        &mut self,
        handler: fn(&C, *mut T),
    ) -> Result<AddressedHandler<T, C>> {
        let code = self.intern(
            handler as usize,
            TypeId::of::<fn(&C, *mut T)>(),
            WireShape::Addressed,
            mem::size_of::<C>(),
            shape::dispatch_addressed::<T, C>,
        )?;
        Ok(AddressedHandler {
            code,
            _marker: PhantomData,
        })
    }

    /// Daftarkan handler dengan payload (shape 2). Handler menerima
    /// `(capture, payload ptr, element count)`; elemen payload dibaca
    /// dengan `read_unaligned` kalau alignment tidak dijamin caller.
    pub fn register_payload<C: WireCopy, P: WireCopy>(
        &mut self,
        handler: fn(&C, *const P, usize),
    ) -> Result<PayloadHandler<C, P>> {
        assert!(
            mem::size_of::<P>() > 0,
            "payload element type must have non-zero size"
        );
        let (wire, dispatch): (WireShape, DispatchFn) = if shape::capture_fits_inline::<C>() {
            (WireShape::PayloadInline, shape::dispatch_payload_inline::<C, P>)
        } else {
            (WireShape::Payload, shape::dispatch_payload::<C, P>)
        };
        let code = self.intern(
            handler as usize,
            TypeId::of::<fn(&C, *const P, usize)>(),
            wire,
            mem::size_of::<C>(),
            dispatch,
        )?;
        Ok(PayloadHandler {
            code,
            _marker: PhantomData,
        })
    }

    /// Daftarkan handler dengan address dan payload (shape 3).
    pub fn register_addressed_payload<T: 'static, C: WireCopy, P: WireCopy>(
        &mut self,
        handler: fn(&C, *mut T, *const P, usize),
    ) -> Result<AddressedPayloadHandler<T, C, P>> {
        assert!(
            mem::size_of::<P>() > 0,
            "payload element type must have non-zero size"
        );
        let code = self.intern(
            handler as usize,
            TypeId::of::<fn(&C, *mut T, *const P, usize)>(),
            WireShape::AddressedPayload,
            mem::size_of::<C>(),
            shape::dispatch_addressed_payload::<T, C, P>,
        )?;
        Ok(AddressedPayloadHandler {
            code,
            _marker: PhantomData,
        })
    }

    /// Lookup by code. O(1).
    #[inline(always)]
    pub(crate) fn entry(&self, code: u32) -> Option<&HandlerEntry> {
        self.entries.get(code as usize)
    }

    /// Jumlah handler terdaftar.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn intern(
        &mut self,
        address: usize,
        fn_type: TypeId,
        wire: WireShape,
        capture_len: usize,
        dispatch: DispatchFn,
    ) -> Result<u32> {
        if let Some(&code) = self.codes.get(&(address, wire, fn_type)) {
            return Ok(code);
        }

        let code = self.entries.len() as u64;
        if code >= MAX_CODES {
            error!("handler registry full at init");
            return Err(RuntimeError::RegistryFull);
        }

        self.entries.push(HandlerEntry {
            shape: wire,
            capture_len,
            handler: address,
            dispatch,
        });
        self.codes.insert((address, wire, fn_type), code as u32);
        Ok(code as u32)
    }
}

// Handler tokens. Hanya angka + tipe; Copy apapun parameternya, jadi
// Clone/Copy di-impl manual tanpa bound.

/// Token untuk shape 0: `send_simple(dest, token, capture)`.
pub struct SimpleHandler<C> {
    code: u32,
    _marker: PhantomData<fn(&C)>,
}

/// Token untuk shape 1: `send_addressed(addr, token, capture)`.
pub struct AddressedHandler<T, C> {
    code: u32,
    _marker: PhantomData<fn(&C, *mut T)>,
}

/// Token untuk shape 2: `send_payload(dest, token, capture, payload)`.
pub struct PayloadHandler<C, P> {
    code: u32,
    _marker: PhantomData<fn(&C, *const P, usize)>,
}

/// Token untuk shape 3: `send_addressed_payload(addr, token, capture, payload)`.
pub struct AddressedPayloadHandler<T, C, P> {
    code: u32,
    _marker: PhantomData<fn(&C, *mut T, *const P, usize)>,
}

macro_rules! token_impls {
    ($name:ident < $($p:ident),* >) => {
        impl<$($p),*> $name<$($p),*> {
            /// 31-bit code yang masuk ke header `fp` field.
            #[inline(always)]
            pub fn code(self) -> u32 {
                self.code
            }
        }
        impl<$($p),*> Clone for $name<$($p),*> {
            fn clone(&self) -> Self {
                *self
            }
        }
        impl<$($p),*> Copy for $name<$($p),*> {}
        impl<$($p),*> std::fmt::Debug for $name<$($p),*> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.code)
            }
        }
    };
}

token_impls!(SimpleHandler<C>);
token_impls!(AddressedHandler<T, C>);
token_impls!(PayloadHandler<C, P>);
token_impls!(AddressedPayloadHandler<T, C, P>);
