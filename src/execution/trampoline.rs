//! Call-boundary marshalling between the dispatcher's flat argument buffer
//! and the typed values a native import works with.
//!
//! Every slot is fixed width and little-endian: 4 bytes for `i32`/`f32`,
//! 8 bytes for `i64`/`f64` and pointer width for references. Slots are
//! packed without padding, so no alignment is assumed. The same buffer
//! carries the arguments in and the results out.

use std::{
    any::Any,
    cell::RefCell,
    ffi::c_void,
    mem::size_of,
    panic::{catch_unwind, AssertUnwindSafe},
};

use super::{
    import::ImportEntry,
    memory::MemoryView,
    value::{Ref, Value},
};
use crate::{binary::types::ValueType, error::Trap};

pub const STATUS_SUCCESS: u32 = 0;
pub const STATUS_ERROR: u32 = 1;

thread_local! {
    // Trap left by the last failed raw call on this thread.
    static PENDING_TRAP: RefCell<Option<Trap>> = const { RefCell::new(None) };
}

/// Takes the trap recorded by the last raw trampoline call on the current
/// thread that returned [`STATUS_ERROR`].
pub fn take_pending_trap() -> Option<Trap> {
    PENDING_TRAP.with(|slot| slot.borrow_mut().take())
}

fn set_pending_trap(trap: Trap) {
    PENDING_TRAP.with(|slot| *slot.borrow_mut() = Some(trap));
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => msg.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

fn read_value(ty: ValueType, slot: &[u8]) -> Value {
    match ty {
        ValueType::I32 => Value::I32(i32::from_le_bytes(read_slot(slot))),
        ValueType::I64 => Value::I64(i64::from_le_bytes(read_slot(slot))),
        ValueType::F32 => Value::F32(f32::from_bits(u32::from_le_bytes(read_slot(slot)))),
        ValueType::F64 => Value::F64(f64::from_bits(u64::from_le_bytes(read_slot(slot)))),
        ValueType::AnyRef => Value::AnyRef(Ref::new(usize::from_le_bytes(read_slot(slot)))),
        ValueType::FuncRef => Value::FuncRef(Ref::new(usize::from_le_bytes(read_slot(slot)))),
    }
}

fn read_slot<const N: usize>(slot: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&slot[..N]);
    bytes
}

fn write_value(value: &Value, slot: &mut [u8]) {
    match value {
        Value::I32(v) => slot[..4].copy_from_slice(&v.to_le_bytes()),
        Value::I64(v) => slot[..8].copy_from_slice(&v.to_le_bytes()),
        Value::F32(v) => slot[..4].copy_from_slice(&v.to_bits().to_le_bytes()),
        Value::F64(v) => slot[..8].copy_from_slice(&v.to_bits().to_le_bytes()),
        Value::AnyRef(r) | Value::FuncRef(r) => {
            slot[..size_of::<usize>()].copy_from_slice(&r.addr().to_le_bytes())
        }
    }
}

/// Decodes one value per kind in `kinds`, front to back.
///
/// # Panics
///
/// Panics if `buffer` is shorter than the summed widths of `kinds`.
pub fn decode(kinds: &[ValueType], buffer: &[u8]) -> Vec<Value> {
    let mut values = Vec::with_capacity(kinds.len());
    let mut cursor = 0;
    for ty in kinds.iter() {
        values.push(read_value(*ty, &buffer[cursor..]));
        cursor += ty.width();
    }
    values
}

/// Encodes `values` front to back. Each value is written with the width
/// of its own kind.
///
/// # Panics
///
/// Panics if `buffer` is shorter than the summed widths of `values`.
pub fn encode(values: &[Value], buffer: &mut [u8]) {
    let mut cursor = 0;
    for value in values.iter() {
        write_value(value, &mut buffer[cursor..]);
        cursor += value.ty().width();
    }
}

fn check_results(kinds: &[ValueType], results: &[Value]) -> Result<(), Trap> {
    if kinds.len() != results.len() {
        return Err(Trap::ResultArity {
            expected: kinds.len(),
            actual: results.len(),
        });
    }
    for (index, (expected, value)) in kinds.iter().zip(results.iter()).enumerate() {
        if *expected != value.ty() {
            return Err(Trap::ResultType {
                index,
                expected: *expected,
                actual: value.ty(),
            });
        }
    }
    Ok(())
}

/// Calls the native import behind `entry` with the arguments encoded in
/// `buffer`, and writes the results back into `buffer`.
///
/// All arguments are decoded before the callback runs, so results can
/// reuse the buffer. When the callback fails, or returns results that do
/// not match its signature, the buffer is left untouched.
///
/// # Panics
///
/// Panics if `buffer` is shorter than [`FuncType::buffer_size`]. Sizing the
/// buffer is the dispatcher's job.
///
/// [`FuncType::buffer_size`]: crate::binary::types::FuncType::buffer_size
pub fn invoke(
    entry: &ImportEntry,
    buffer: &mut [u8],
    mut memory: MemoryView<'_>,
) -> Result<(), Trap> {
    let ty = entry.ty();
    let params = decode(&ty.params, buffer);
    log::trace!(
        "call {}.{} with {:?} ({} pages)",
        entry.module,
        entry.name,
        params,
        memory.pages()
    );

    let callback = entry.func.callback();
    let results = callback(&mut memory, &params).map_err(Trap::Host)?;
    check_results(&ty.results, &results)?;

    encode(&results, buffer);
    log::trace!("return {}.{} with {:?}", entry.module, entry.name, results);
    Ok(())
}

/// Raw call target installed by the dispatcher for a preloaded import.
///
/// Returns [`STATUS_SUCCESS`], or [`STATUS_ERROR`] after storing the trap
/// for the calling thread, where [`take_pending_trap`] picks it up. A
/// panicking callback is caught and reported as [`Trap::Panic`]; nothing
/// unwinds out of this frame.
///
/// # Safety
///
/// - `data` must come from [`ImportEntry::context_ptr`] on an entry that is
///   still alive.
/// - `argv` must point to at least `Signature::buffer_size` writable bytes
///   for that entry's signature. It may be null when that size is 0.
/// - `mem_base` must point to `mem_pages * PAGE_SIZE` writable bytes not
///   aliased for the duration of the call, or be null with `mem_pages` 0.
pub unsafe extern "C" fn native_trampoline(
    data: *const c_void,
    argv: *mut u8,
    mem_pages: usize,
    mem_base: *mut u8,
) -> u32 {
    let entry = unsafe { &*(data as *const ImportEntry) };
    let size = entry.signature.buffer_size();
    let buffer: &mut [u8] = if size == 0 || argv.is_null() {
        &mut []
    } else {
        unsafe { std::slice::from_raw_parts_mut(argv, size) }
    };
    let memory = unsafe { MemoryView::from_raw(mem_pages, mem_base) };

    let result = catch_unwind(AssertUnwindSafe(|| invoke(entry, buffer, memory)))
        .unwrap_or_else(|payload| Err(Trap::Panic(panic_message(payload))));

    match result {
        Ok(()) => STATUS_SUCCESS,
        Err(trap) => {
            log::warn!("{}.{} trapped: {}", entry.module, entry.name, trap);
            set_pending_trap(trap);
            STATUS_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode, encode, invoke, native_trampoline, take_pending_trap, STATUS_ERROR, STATUS_SUCCESS,
    };
    use crate::{
        binary::types::{FuncType, ValueType},
        error::Trap,
        execution::{
            engine::{Config, Engine},
            import::Func,
            memory::{MemoryInst, MemoryView, PAGE_SIZE},
            value::{Ref, Value},
        },
    };
    use anyhow::{bail, Result};
    use pretty_assertions::assert_eq;
    use std::{
        mem::size_of,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn numeric_round_trip() {
        let kinds = [ValueType::I32, ValueType::I64, ValueType::F32, ValueType::F64];
        let tests = vec![
            vec![Value::I32(0), Value::I64(0), Value::F32(0.0), Value::F64(0.0)],
            vec![
                Value::I32(i32::MIN),
                Value::I64(i64::MAX),
                Value::F32(-1.5),
                Value::F64(f64::MIN_POSITIVE),
            ],
            vec![
                Value::I32(-1),
                Value::I64(-1),
                Value::F32(f32::INFINITY),
                Value::F64(f64::from_bits(0x7ff8_0000_0000_00ff)),
            ],
        ];
        for values in tests {
            let mut buffer = [0u8; 24];
            encode(&values, &mut buffer);
            assert_eq!(decode(&kinds, &buffer), values);
        }
    }

    #[test]
    fn null_ref_is_zero_slot() {
        let mut buffer = [0xffu8; 16];
        encode(&[Value::AnyRef(Ref::NULL)], &mut buffer);
        assert_eq!(&buffer[..size_of::<usize>()], &[0u8; size_of::<usize>()][..]);

        let zero = [0u8; size_of::<usize>()];
        assert_eq!(decode(&[ValueType::AnyRef], &zero), vec![Value::AnyRef(Ref::NULL)]);
        assert_eq!(decode(&[ValueType::FuncRef], &zero), vec![Value::FuncRef(Ref::NULL)]);
    }

    #[test]
    fn non_null_ref_is_raw_address() {
        let mut buffer = [0u8; size_of::<usize>()];
        encode(&[Value::func_ref(Ref::new(0xdead_beef))], &mut buffer);
        assert_eq!(buffer, 0xdead_beef_usize.to_le_bytes());
        assert_eq!(
            decode(&[ValueType::FuncRef], &buffer),
            vec![Value::FuncRef(Ref::new(0xdead_beef))]
        );
    }

    #[test]
    fn width_correctness() -> Result<()> {
        init();
        let mut engine = Engine::default();
        let seen = Arc::new(std::sync::Mutex::new(vec![]));
        let recorded = seen.clone();
        engine.preload_native(
            "env",
            "f",
            Func::new(
                FuncType::new(vec![ValueType::I32, ValueType::I64], vec![ValueType::F32]),
                move |_, params| {
                    recorded.lock().unwrap().extend_from_slice(params);
                    Ok(vec![Value::F32(3.5)])
                },
            ),
        )?;
        let entry = engine.resolve("env", "f").unwrap();

        let mut buffer = [0u8; 12];
        buffer[..4].copy_from_slice(&7i32.to_le_bytes());
        buffer[4..].copy_from_slice(&9i64.to_le_bytes());
        invoke(&entry, &mut buffer, MemoryView::empty())?;

        assert_eq!(*seen.lock().unwrap(), vec![Value::I32(7), Value::I64(9)]);
        assert_eq!(&buffer[..4], &3.5f32.to_bits().to_le_bytes()[..]);
        // bytes past the result slot keep the argument data
        assert_eq!(&buffer[4..], &9i64.to_le_bytes()[..]);
        Ok(())
    }

    #[test]
    fn host_error_short_circuits() -> Result<()> {
        init();
        let mut engine = Engine::default();
        engine.preload_native(
            "env",
            "fail",
            Func::new(
                FuncType::new(vec![ValueType::I32], vec![ValueType::I64]),
                |_, _| bail!("boom"),
            ),
        )?;
        let entry = engine.resolve("env", "fail").unwrap();

        let mut buffer = [0u8; 8];
        buffer[..4].copy_from_slice(&5i32.to_le_bytes());
        let before = buffer;
        let err = invoke(&entry, &mut buffer, MemoryView::empty()).unwrap_err();
        assert!(matches!(err, Trap::Host(_)));
        assert_eq!(err.to_string(), "host function failed: boom");
        assert_eq!(buffer, before);
        Ok(())
    }

    #[test]
    fn mismatched_results_are_trapped() -> Result<()> {
        let mut engine = Engine::default();
        let ty = FuncType::new(vec![], vec![ValueType::I32]);
        engine.preload_native("env", "none", Func::new(ty.clone(), |_, _| Ok(vec![])))?;
        engine.preload_native(
            "env",
            "wrong",
            Func::new(ty, |_, _| Ok(vec![Value::F32(1.0)])),
        )?;

        let mut buffer = [0u8; 4];
        let err = invoke(&engine.resolve("env", "none").unwrap(), &mut buffer, MemoryView::empty())
            .unwrap_err();
        assert!(matches!(
            err,
            Trap::ResultArity {
                expected: 1,
                actual: 0
            }
        ));

        let err = invoke(&engine.resolve("env", "wrong").unwrap(), &mut buffer, MemoryView::empty())
            .unwrap_err();
        assert!(matches!(
            err,
            Trap::ResultType {
                index: 0,
                expected: ValueType::I32,
                actual: ValueType::F32
            }
        ));
        assert_eq!(buffer, [0u8; 4]);
        Ok(())
    }

    #[test]
    fn callback_sees_memory() -> Result<()> {
        let mut engine = Engine::default();
        engine.preload_native(
            "env",
            "load",
            Func::new(
                FuncType::new(vec![ValueType::I32], vec![ValueType::I32]),
                |memory, params| {
                    let value = memory.read_i32(params[0].as_i32() as usize)?;
                    memory.write_i32(0, value * 2)?;
                    Ok(vec![Value::I32(memory.pages() as i32)])
                },
            ),
        )?;
        let entry = engine.resolve("env", "load").unwrap();

        let mut memory = MemoryInst::default();
        memory.data = vec![0; PAGE_SIZE];
        memory.data[16..20].copy_from_slice(&21i32.to_le_bytes());

        let mut buffer = 16i32.to_le_bytes();
        invoke(&entry, &mut buffer, memory.view())?;
        assert_eq!(i32::from_le_bytes(buffer), 1);
        assert_eq!(&memory.data[..4], &42i32.to_le_bytes()[..]);
        Ok(())
    }

    #[test]
    fn raw_trampoline_status() -> Result<()> {
        init();
        let mut engine = Engine::new(Config::default().reference_types(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        engine.preload_native(
            "env",
            "id",
            Func::new(
                FuncType::new(vec![ValueType::AnyRef], vec![ValueType::AnyRef]),
                move |_, params| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![params[0]])
                },
            ),
        )?;
        engine.preload_native(
            "env",
            "fail",
            Func::new(FuncType::default(), |_, _| bail!("nope")),
        )?;

        let id = engine.resolve("env", "id").unwrap();
        let mut buffer = 0x1234usize.to_le_bytes();
        let mut memory = vec![0u8; PAGE_SIZE];
        let status = unsafe {
            native_trampoline(id.context_ptr(), buffer.as_mut_ptr(), 1, memory.as_mut_ptr())
        };
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(usize::from_le_bytes(buffer), 0x1234);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(take_pending_trap().is_none());

        let fail = engine.resolve("env", "fail").unwrap();
        let status = unsafe {
            native_trampoline(fail.context_ptr(), std::ptr::null_mut(), 0, std::ptr::null_mut())
        };
        assert_eq!(status, STATUS_ERROR);
        assert!(matches!(take_pending_trap(), Some(Trap::Host(_))));
        assert!(take_pending_trap().is_none());
        Ok(())
    }

    #[test]
    fn panicking_callback_returns_error_status() -> Result<()> {
        init();
        let mut engine = Engine::default();
        engine.preload_native(
            "env",
            "p",
            Func::new(FuncType::new(vec![ValueType::I32], vec![]), |_, params| {
                let _ = params[0].as_i64();
                Ok(vec![])
            }),
        )?;

        let entry = engine.resolve("env", "p").unwrap();
        let mut buffer = 1i32.to_le_bytes();
        let status = unsafe {
            native_trampoline(
                entry.context_ptr(),
                buffer.as_mut_ptr(),
                0,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(status, STATUS_ERROR);
        match take_pending_trap() {
            Some(Trap::Panic(msg)) => assert!(msg.contains("type mismatch"), "{}", msg),
            other => panic!("unexpected trap: {:?}", other),
        }
        assert_eq!(buffer, 1i32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn pending_trap_is_per_thread() -> Result<()> {
        let mut engine = Engine::default();
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let both_failed = barrier.clone();
        engine.preload_native(
            "env",
            "fail",
            Func::new(FuncType::new(vec![ValueType::I32], vec![]), move |_, params| {
                both_failed.wait();
                bail!("failed with {}", params[0].as_i32())
            }),
        )?;
        let entry = engine.resolve("env", "fail").unwrap();

        let handles: Vec<_> = (1..=2)
            .map(|arg: i32| {
                let entry = entry.clone();
                std::thread::spawn(move || {
                    let mut buffer = arg.to_le_bytes();
                    let status = unsafe {
                        native_trampoline(
                            entry.context_ptr(),
                            buffer.as_mut_ptr(),
                            0,
                            std::ptr::null_mut(),
                        )
                    };
                    (status, take_pending_trap().map(|trap| trap.to_string()))
                })
            })
            .collect();

        for (arg, handle) in (1..=2).zip(handles) {
            let (status, trap) = handle.join().unwrap();
            assert_eq!(status, STATUS_ERROR);
            assert_eq!(
                trap,
                Some(format!("host function failed: failed with {}", arg))
            );
        }
        Ok(())
    }
}
