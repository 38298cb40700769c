//! WASM-hosted engine implementation.
//!
//! Each worker owns one instantiated module. Calls cross the guest boundary
//! as JSON: the host allocates guest memory through the exported `esbox_alloc`,
//! writes the request, and invokes the entry point, which returns a packed
//! `(ptr << 32) | len` locating the JSON reply.
//!
//! This is the call contract of the `esbox-engine-wasm` distribution the
//! artifact fetcher targets: a standalone module that imports nothing from
//! the host and exports
//! - `memory`: the linear memory
//! - `esbox_alloc(len: i32) -> i32`
//! - `esbox_transform(ptr: i32, len: i32) -> i64`
//! - `esbox_build(ptr: i32, len: i32) -> i64`
//!
//! The reply is `{"ok": …}` on success or
//! `{"err": {"errors": […], "warnings": […]}}` for compile diagnostics.

use esbox_core::engine::{Engine, EngineError, EngineFactory, RawBuild, RawTransform};
use esbox_proto::{BuildOptions, Diagnostic, RawFiles, TransformOptions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use wasmer::{imports, Instance, Memory, Module, Store, TypedFunction};

/// Engine instance backed by a wasmer store.
pub struct WasmEngine {
    store: Store,
    memory: Memory,
    alloc: TypedFunction<i32, i32>,
    transform_fn: TypedFunction<(i32, i32), i64>,
    build_fn: TypedFunction<(i32, i32), i64>,
}

#[derive(Serialize)]
struct TransformCall<'a> {
    input: &'a str,
    options: &'a TransformOptions,
}

#[derive(Serialize)]
struct BuildCall<'a> {
    files: &'a RawFiles,
    options: &'a BuildOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum EngineReply<T> {
    Ok(T),
    Err {
        errors: Vec<Diagnostic>,
        #[serde(default)]
        warnings: Vec<Diagnostic>,
    },
}

impl WasmEngine {
    /// Compile and instantiate an engine module.
    pub fn from_bytes(wasm: &[u8]) -> Result<Self, EngineError> {
        let mut store = Store::default();
        let module = Module::new(&store, wasm)
            .map_err(|e| EngineError::Failure(format!("module compile failed: {e}")))?;

        let imports = imports! {};
        let instance = Instance::new(&mut store, &module, &imports)
            .map_err(|e| EngineError::Failure(format!("instantiation failed: {e}")))?;

        let memory = instance
            .exports
            .get_memory("memory")
            .map_err(|e| EngineError::Failure(format!("missing memory export: {e}")))?
            .clone();
        let alloc = instance
            .exports
            .get_typed_function(&store, "esbox_alloc")
            .map_err(|e| EngineError::Failure(format!("missing alloc export: {e}")))?;
        let transform_fn = instance
            .exports
            .get_typed_function(&store, "esbox_transform")
            .map_err(|e| EngineError::Failure(format!("missing transform export: {e}")))?;
        let build_fn = instance
            .exports
            .get_typed_function(&store, "esbox_build")
            .map_err(|e| EngineError::Failure(format!("missing build export: {e}")))?;

        Ok(Self {
            store,
            memory,
            alloc,
            transform_fn,
            build_fn,
        })
    }

    /// Round-trip one JSON request through a guest entry point.
    fn call_json<T: DeserializeOwned>(
        &mut self,
        entry: EntryPoint,
        request: &[u8],
    ) -> Result<T, EngineError> {
        let len = i32::try_from(request.len())
            .map_err(|_| EngineError::Failure("request exceeds guest address space".to_string()))?;

        let ptr = self
            .alloc
            .call(&mut self.store, len)
            .map_err(|e| EngineError::Failure(format!("guest alloc trapped: {e}")))?;

        self.memory
            .view(&self.store)
            .write(u64::try_from(ptr).unwrap_or(0), request)
            .map_err(|e| EngineError::Failure(format!("guest memory write failed: {e}")))?;

        let func = match entry {
            EntryPoint::Transform => &self.transform_fn,
            EntryPoint::Build => &self.build_fn,
        };
        let packed = func
            .call(&mut self.store, ptr, len)
            .map_err(|e| EngineError::Failure(format!("engine call trapped: {e}")))?;

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let (out_ptr, out_len) = ((packed >> 32) as u64, (packed & 0xFFFF_FFFF) as usize);
        debug!(out_ptr, out_len, "engine replied");

        let mut reply = vec![0u8; out_len];
        self.memory
            .view(&self.store)
            .read(out_ptr, &mut reply)
            .map_err(|e| EngineError::Failure(format!("guest memory read failed: {e}")))?;

        let reply: EngineReply<T> = serde_json::from_slice(&reply)
            .map_err(|e| EngineError::Failure(format!("malformed engine reply: {e}")))?;
        match reply {
            EngineReply::Ok(value) => Ok(value),
            EngineReply::Err { errors, warnings } => {
                Err(EngineError::Diagnostics { errors, warnings })
            }
        }
    }
}

#[derive(Clone, Copy)]
enum EntryPoint {
    Transform,
    Build,
}

impl Engine for WasmEngine {
    fn transform(
        &mut self,
        input: &str,
        options: &TransformOptions,
    ) -> Result<RawTransform, EngineError> {
        let request = serde_json::to_vec(&TransformCall { input, options })
            .map_err(|e| EngineError::Failure(format!("request encode failed: {e}")))?;
        self.call_json(EntryPoint::Transform, &request)
    }

    fn build(&mut self, files: &RawFiles, options: &BuildOptions) -> Result<RawBuild, EngineError> {
        let request = serde_json::to_vec(&BuildCall { files, options })
            .map_err(|e| EngineError::Failure(format!("request encode failed: {e}")))?;
        self.call_json(EntryPoint::Build, &request)
    }
}

/// Factory producing one [`WasmEngine`] per worker from the fetched artifact.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasmEngineFactory;

impl EngineFactory for WasmEngineFactory {
    fn create(&self, version: &str, wasm: &[u8]) -> Result<Box<dyn Engine>, EngineError> {
        debug!(version, bytes = wasm.len(), "instantiating engine");
        Ok(Box::new(WasmEngine::from_bytes(wasm)?))
    }
}
