use anyhow::{Result, anyhow};
use wasmbridge::{
    binary::{
        module::Module,
        types::{FuncType, ValueType},
    },
    execution::{
        engine::{Config, Engine},
        import::Func,
        linker::Linker,
        memory::MemoryInst,
        value::Value,
    },
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut engine = Engine::new(Config::from_env());
    engine.preload_native(
        "env",
        "add",
        Func::new(
            FuncType::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]),
            |_, args| Ok(vec![Value::I32(args[0].as_i32().wrapping_add(args[1].as_i32()))]),
        ),
    )?;
    engine.preload_native(
        "env",
        "log_str",
        Func::new(
            FuncType::new(vec![ValueType::I32, ValueType::I32], vec![]),
            |memory, args| {
                let s = memory.read_str(args[0].as_i32() as usize, args[1].as_i32() as usize)?;
                log::info!("{}", s);
                Ok(vec![])
            },
        ),
    )?;

    let wasm = include_bytes!("./fixtures/import.wasm");
    let module = Module::new(wasm)?;
    let imports = Linker::new(&engine).link(&module)?;

    let limits = module
        .memory_section
        .as_ref()
        .and_then(|memories| memories.first())
        .map(|memory| memory.limits)
        .ok_or(anyhow!("not found memory"))?;
    let mut memory = MemoryInst::new(limits, engine.config().max_memory_pages)?;

    let sum = imports[0].call(&[Value::I32(40), Value::I32(2)], &mut memory)?;
    log::info!("env.add(40, 2) = {:?}", sum);

    let message = b"hello world";
    memory.view().write(0, message)?;
    imports[1].call(&[Value::I32(0), Value::I32(message.len() as i32)], &mut memory)?;
    Ok(())
}
