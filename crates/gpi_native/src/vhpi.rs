//! VHDL Procedural Interface (IEEE 1076 clause 17) adapter.

use std::ffi::{c_char, c_long, CString};
use std::ptr;

use gpi_common::{Logic, LogicVec, Precision, SimTime};
use gpi_core::{
    Backend, CallbackId, Edge, GpiError, IterKind, LifecycleEvent, ObjectDesc, ObjectHandle,
    ObjectIter, ObjectType, Phase, Range, SignalValue, ValueFormat, WriteAction,
};
use tracing::{debug, warn};

use crate::host::{self, owned_str, pack_user_data, unpack_user_data};

/// Raw declarations from `vhpi_user.h`.
#[allow(non_camel_case_types, non_upper_case_globals, non_snake_case, dead_code)]
mod sys {
    use std::ffi::{c_char, c_int, c_long, c_void};

    pub type vhpiHandleT = *mut c_void;
    pub type vhpiIntT = i32;

    // Callback reasons
    pub const vhpiCbValueChange: i32 = 1001;
    pub const vhpiCbAfterDelay: i32 = 1010;
    pub const vhpiCbNextTimeStep: i32 = 1012;
    pub const vhpiCbEndOfProcesses: i32 = 1018;
    pub const vhpiCbLastKnownDeltaCycle: i32 = 1020;
    pub const vhpiCbStartOfSimulation: i32 = 1034;
    pub const vhpiCbEndOfSimulation: i32 = 1035;

    pub const vhpiReturnCb: i32 = 0x1;

    // Value formats
    pub const vhpiBinStrVal: i32 = 1;
    pub const vhpiIntVal: i32 = 6;
    pub const vhpiLogicVal: i32 = 7;
    pub const vhpiRealVal: i32 = 8;
    pub const vhpiStrVal: i32 = 9;

    // Put modes
    pub const vhpiDeposit: i32 = 0;
    pub const vhpiDepositPropagate: i32 = 1;
    pub const vhpiForce: i32 = 2;
    pub const vhpiForcePropagate: i32 = 3;
    pub const vhpiRelease: i32 = 4;

    pub const vhpiFinish: i32 = 1;

    // Integer properties
    pub const vhpiKindP: i32 = 1043;
    pub const vhpiLeftBoundP: i32 = 1044;
    pub const vhpiRightBoundP: i32 = 1063;
    pub const vhpiSizeP: i32 = 1065;

    // Physical properties
    pub const vhpiResolutionLimitP: i32 = 1407;

    // String properties
    pub const vhpiDefNameP: i32 = 1303;
    pub const vhpiFileNameP: i32 = 1304;
    pub const vhpiFullNameP: i32 = 1306;
    pub const vhpiNameP: i32 = 1313;
    pub const vhpiToolVersionP: i32 = 1316;

    // One-to-one relations
    pub const vhpiRootInst: i32 = 1361;
    pub const vhpiTool: i32 = 1371;

    // One-to-many relations
    pub const vhpiCompInstStmts: i32 = 1510;
    pub const vhpiDecls: i32 = 1519;
    pub const vhpiDrivers: i32 = 1523;
    pub const vhpiInternalRegions: i32 = 1533;
    pub const vhpiPackInsts: i32 = 1535;
    pub const vhpiPortDecls: i32 = 1539;
    pub const vhpiSigDecls: i32 = 1546;
    pub const vhpiLocalLoads: i32 = 1558;

    // Object kinds
    pub const vhpiBlockStmtK: i32 = 1018;
    pub const vhpiCompInstStmtK: i32 = 1025;
    pub const vhpiConstDeclK: i32 = 1029;
    pub const vhpiForGenerateK: i32 = 1049;
    pub const vhpiGenericDeclK: i32 = 1054;
    pub const vhpiIfGenerateK: i32 = 1057;
    pub const vhpiPackInstK: i32 = 1075;
    pub const vhpiPortDeclK: i32 = 1080;
    pub const vhpiRootInstK: i32 = 1090;
    pub const vhpiSigDeclK: i32 = 1094;

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    pub struct vhpiTimeT {
        pub high: u32,
        pub low: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Default)]
    pub struct vhpiPhysT {
        pub high: i32,
        pub low: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub union vhpiValueUnion {
        pub enumv: u32,
        pub intg: vhpiIntT,
        pub longintg: i64,
        pub real: f64,
        pub phys: vhpiPhysT,
        pub time: vhpiTimeT,
        pub str_: *mut c_char,
        pub ptr: *mut c_void,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct vhpiValueT {
        pub format: i32,
        pub bufSize: usize,
        pub numElems: i32,
        pub unit: vhpiPhysT,
        pub value: vhpiValueUnion,
    }

    #[repr(C)]
    pub struct vhpiCbDataT {
        pub reason: i32,
        pub cb_rtn: Option<unsafe extern "C" fn(*const vhpiCbDataT)>,
        pub obj: vhpiHandleT,
        pub time: *mut vhpiTimeT,
        pub value: *mut vhpiValueT,
        pub user_data: *mut c_void,
    }

    extern "C" {
        pub fn vhpi_register_cb(cb_data: *mut vhpiCbDataT, flags: i32) -> vhpiHandleT;
        pub fn vhpi_remove_cb(cb: vhpiHandleT) -> c_int;
        pub fn vhpi_handle(relation: i32, refh: vhpiHandleT) -> vhpiHandleT;
        pub fn vhpi_handle_by_name(name: *const c_char, scope: vhpiHandleT) -> vhpiHandleT;
        pub fn vhpi_iterator(relation: i32, refh: vhpiHandleT) -> vhpiHandleT;
        pub fn vhpi_scan(iterator: vhpiHandleT) -> vhpiHandleT;
        pub fn vhpi_get(property: i32, object: vhpiHandleT) -> vhpiIntT;
        pub fn vhpi_get_str(property: i32, object: vhpiHandleT) -> *const c_char;
        pub fn vhpi_get_phys(property: i32, object: vhpiHandleT) -> vhpiPhysT;
        pub fn vhpi_get_value(expr: vhpiHandleT, value: *mut vhpiValueT) -> c_int;
        pub fn vhpi_put_value(object: vhpiHandleT, value: *mut vhpiValueT, mode: i32) -> c_int;
        pub fn vhpi_get_time(time: *mut vhpiTimeT, cycles: *mut c_long);
        pub fn vhpi_release_handle(object: vhpiHandleT) -> c_int;
        pub fn vhpi_control(command: i32, ...) -> c_int;
    }

    pub fn value(format: i32) -> vhpiValueT {
        vhpiValueT {
            format,
            bufSize: 0,
            numElems: 0,
            unit: vhpiPhysT::default(),
            value: vhpiValueUnion {
                ptr: std::ptr::null_mut(),
            },
        }
    }
}

use sys::*;

/// Backend over the simulator's VHPI.
///
/// Object handles carry the native `vhpiHandleT` as their raw value.
#[derive(Default)]
pub struct VhpiBackend;

impl VhpiBackend {
    /// Creates the adapter.
    pub fn new() -> Self {
        Self
    }

    fn lookup(name: &str) -> Option<vhpiHandleT> {
        let name = CString::new(name).ok()?;
        // SAFETY: `name` is a valid C string for the duration of the call.
        let h = unsafe { vhpi_handle_by_name(name.as_ptr(), ptr::null_mut()) };
        (!h.is_null()).then_some(h)
    }

    fn handle_of(obj: &ObjectHandle) -> Result<vhpiHandleT, GpiError> {
        Self::lookup(obj.full_name())
            .ok_or_else(|| GpiError::ObjectNotFound(obj.full_name().to_string()))
    }

    fn register(
        reason: i32,
        obj: vhpiHandleT,
        mut time: Option<vhpiTimeT>,
        user_data: usize,
    ) -> Result<u64, GpiError> {
        let mut data = vhpiCbDataT {
            reason,
            cb_rtn: Some(on_callback),
            obj,
            time: time
                .as_mut()
                .map_or(ptr::null_mut(), |t| t as *mut vhpiTimeT),
            value: ptr::null_mut(),
            user_data: user_data as *mut _,
        };
        // SAFETY: the simulator copies `data` and `time` before returning.
        let cb = unsafe { vhpi_register_cb(&mut data, vhpiReturnCb) };
        if cb.is_null() {
            return Err(GpiError::RegistrationFailure(format!(
                "vhpi_register_cb refused reason {reason}"
            )));
        }
        Ok(cb as usize as u64)
    }
}

fn get_str(property: i32, h: vhpiHandleT) -> Option<String> {
    // SAFETY: `h` came from the simulator; the string is copied at once.
    unsafe { owned_str(vhpi_get_str(property, h)) }
}

fn get_int(property: i32, h: vhpiHandleT) -> i32 {
    // SAFETY: `h` came from the simulator.
    unsafe { vhpi_get(property, h) }
}

fn classify(kind: i32, size: i32) -> ObjectType {
    match kind {
        vhpiRootInstK | vhpiCompInstStmtK | vhpiBlockStmtK | vhpiIfGenerateK => ObjectType::Module,
        vhpiForGenerateK => ObjectType::GenArray,
        vhpiPackInstK => ObjectType::Package,
        vhpiSigDeclK | vhpiPortDeclK if size > 1 => ObjectType::LogicArray,
        vhpiSigDeclK | vhpiPortDeclK => ObjectType::Logic,
        vhpiGenericDeclK | vhpiConstDeclK => ObjectType::Integer,
        _ => ObjectType::Unknown,
    }
}

fn describe(h: vhpiHandleT) -> ObjectDesc {
    let kind_code = get_int(vhpiKindP, h);
    let size = get_int(vhpiSizeP, h);
    let kind = classify(kind_code, size);
    let name = get_str(vhpiNameP, h).unwrap_or_default();
    let full_name = get_str(vhpiFullNameP, h).unwrap_or_else(|| name.clone());
    let mut desc = ObjectDesc::new(h as usize as u64, name, full_name, kind);
    desc.is_const = matches!(kind_code, vhpiGenericDeclK | vhpiConstDeclK);
    desc.num_elems = (size > 0).then_some(size as u32);
    desc.indexable = matches!(kind, ObjectType::LogicArray | ObjectType::GenArray);
    if kind == ObjectType::LogicArray {
        desc.range = Some(Range::new(
            get_int(vhpiLeftBoundP, h),
            get_int(vhpiRightBoundP, h),
        ));
    }
    if kind == ObjectType::Module {
        desc.definition_name = get_str(vhpiDefNameP, h);
        desc.definition_file = get_str(vhpiFileNameP, h);
    }
    desc
}

fn iterate_relation(relation: i32, parent: vhpiHandleT) -> Vec<ObjectDesc> {
    let mut out = Vec::new();
    // SAFETY: `parent` is null or came from the simulator; the iterator is
    // released once exhausted.
    unsafe {
        let iter = vhpi_iterator(relation, parent);
        if iter.is_null() {
            return out;
        }
        loop {
            let h = vhpi_scan(iter);
            if h.is_null() {
                break;
            }
            out.push(describe(h));
        }
        vhpi_release_handle(iter);
    }
    out
}

fn root_handle() -> Option<vhpiHandleT> {
    // SAFETY: a null reference asks for the design root.
    let h = unsafe { vhpi_handle(vhpiRootInst, ptr::null_mut()) };
    (!h.is_null()).then_some(h)
}

/// Reads a string-shaped value into an owned buffer sized for the object.
fn read_string(h: vhpiHandleT, format: i32) -> Option<String> {
    let size = get_int(vhpiSizeP, h).max(0) as usize;
    let mut buf = vec![0u8; size + 1];
    let mut v = value(format);
    v.bufSize = buf.len();
    v.value.str_ = buf.as_mut_ptr() as *mut c_char;
    // SAFETY: `buf` is large enough for `size` characters plus the NUL and
    // outlives the call.
    let rc = unsafe { vhpi_get_value(h, &mut v) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    buf.truncate(end);
    String::from_utf8(buf).ok()
}

fn read_bits(h: vhpiHandleT) -> Option<LogicVec> {
    read_string(h, vhpiBinStrVal).and_then(|s| LogicVec::from_binary_str(&s))
}

impl Backend for VhpiBackend {
    fn name(&self) -> &str {
        "vhpi"
    }

    fn root(&mut self, name: Option<&str>) -> Result<ObjectDesc, GpiError> {
        let desc = root_handle()
            .map(describe)
            .ok_or_else(|| GpiError::ObjectNotFound("<root>".into()))?;
        match name {
            Some(n) if !desc.name.eq_ignore_ascii_case(n) => {
                Err(GpiError::ObjectNotFound(n.to_string()))
            }
            _ => Ok(desc),
        }
    }

    fn child_by_name(
        &mut self,
        parent: &ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectDesc>, GpiError> {
        Ok(Self::lookup(&format!("{}.{}", parent.full_name(), name)).map(describe))
    }

    fn child_by_index(
        &mut self,
        parent: &ObjectHandle,
        index: i32,
    ) -> Result<Option<ObjectDesc>, GpiError> {
        Ok(Self::lookup(&format!("{}({})", parent.full_name(), index)).map(describe))
    }

    fn iterate(
        &mut self,
        parent: Option<&ObjectHandle>,
        kind: IterKind,
    ) -> Result<ObjectIter, GpiError> {
        let scope = match parent {
            Some(p) => Self::handle_of(p)?,
            None => root_handle().unwrap_or(ptr::null_mut()),
        };
        let descs: Vec<ObjectDesc> = match kind {
            IterKind::Children if parent.is_none() => root_handle().map(describe).into_iter().collect(),
            IterKind::Children => [vhpiInternalRegions, vhpiDecls]
                .iter()
                .flat_map(|&r| iterate_relation(r, scope))
                .collect(),
            IterKind::Drivers => iterate_relation(vhpiDrivers, scope),
            IterKind::Loads => iterate_relation(vhpiLocalLoads, scope),
            IterKind::PackageScopes => iterate_relation(vhpiPackInsts, ptr::null_mut()),
        };
        Ok(Box::new(descs.into_iter()))
    }

    fn get_value(&mut self, obj: &ObjectHandle, format: ValueFormat) -> Result<SignalValue, GpiError> {
        let h = Self::handle_of(obj)?;
        let unreadable = || GpiError::backend("vhpi", format!("cannot read {}", obj.full_name()));
        match format {
            ValueFormat::BinStr => read_bits(h).map(SignalValue::BinStr).ok_or_else(unreadable),
            ValueFormat::Bytes => read_string(h, vhpiStrVal)
                .map(|s| SignalValue::Bytes(s.into_bytes()))
                .ok_or_else(unreadable),
            ValueFormat::Int | ValueFormat::Real => {
                let mut v = value(if format == ValueFormat::Int {
                    vhpiIntVal
                } else {
                    vhpiRealVal
                });
                // SAFETY: scalar formats need no buffer.
                let rc = unsafe { vhpi_get_value(h, &mut v) };
                if rc != 0 {
                    return Err(unreadable());
                }
                // SAFETY: the union member matches the requested format.
                Ok(unsafe {
                    if format == ValueFormat::Int {
                        SignalValue::Int(v.value.intg)
                    } else {
                        SignalValue::Real(v.value.real)
                    }
                })
            }
        }
    }

    fn set_value(
        &mut self,
        obj: &ObjectHandle,
        new: &SignalValue,
        action: WriteAction,
    ) -> Result<(), GpiError> {
        let h = Self::handle_of(obj)?;
        let mode = match action {
            WriteAction::Deposit => vhpiDepositPropagate,
            WriteAction::NoDelay => vhpiDeposit,
            WriteAction::Force => vhpiForcePropagate,
            WriteAction::Release => vhpiRelease,
        };
        let mut text: Option<CString> = None;
        let mut v = match new {
            SignalValue::Int(i) => {
                let mut v = value(vhpiIntVal);
                v.value.intg = *i;
                v
            }
            SignalValue::Real(r) => {
                let mut v = value(vhpiRealVal);
                v.value.real = *r;
                v
            }
            SignalValue::BinStr(bits) => {
                let s = text.insert(
                    CString::new(bits.to_string())
                        .map_err(|e| GpiError::InvalidArgument(e.to_string()))?,
                );
                let mut v = value(vhpiBinStrVal);
                v.bufSize = s.as_bytes_with_nul().len();
                v.value.str_ = s.as_ptr() as *mut c_char;
                v
            }
            SignalValue::Bytes(bytes) => {
                let s = text.insert(
                    CString::new(bytes.clone())
                        .map_err(|e| GpiError::InvalidArgument(e.to_string()))?,
                );
                let mut v = value(vhpiStrVal);
                v.bufSize = s.as_bytes_with_nul().len();
                v.value.str_ = s.as_ptr() as *mut c_char;
                v
            }
        };
        // SAFETY: `v` and the string in `text` outlive the call.
        let rc = unsafe { vhpi_put_value(h, &mut v, mode) };
        if rc != 0 {
            return Err(GpiError::backend(
                "vhpi",
                format!("vhpi_put_value failed on {}", obj.full_name()),
            ));
        }
        debug!(object = obj.full_name(), ?action, value = %new, "vhpi_put_value");
        Ok(())
    }

    fn register_timed(&mut self, steps: u64, id: CallbackId) -> Result<u64, GpiError> {
        let (high, low) = SimTime::from_steps(steps).to_words();
        Self::register(
            vhpiCbAfterDelay,
            ptr::null_mut(),
            Some(vhpiTimeT { high, low }),
            pack_user_data(id, Edge::Any),
        )
    }

    fn register_value_change(
        &mut self,
        obj: &ObjectHandle,
        edge: Edge,
        id: CallbackId,
    ) -> Result<u64, GpiError> {
        let h = Self::handle_of(obj)?;
        Self::register(vhpiCbValueChange, h, None, pack_user_data(id, edge))
    }

    fn register_phase(&mut self, phase: Phase, id: CallbackId) -> Result<u64, GpiError> {
        let reason = match phase {
            Phase::ReadWrite => vhpiCbEndOfProcesses,
            Phase::ReadOnly => vhpiCbLastKnownDeltaCycle,
            Phase::NextTimeStep => vhpiCbNextTimeStep,
        };
        Self::register(reason, ptr::null_mut(), None, pack_user_data(id, Edge::Any))
    }

    fn register_lifecycle(&mut self, event: LifecycleEvent, id: CallbackId) -> Result<u64, GpiError> {
        let reason = match event {
            LifecycleEvent::StartOfSim => vhpiCbStartOfSimulation,
            LifecycleEvent::EndOfSim => vhpiCbEndOfSimulation,
        };
        Self::register(reason, ptr::null_mut(), None, pack_user_data(id, Edge::Any))
    }

    fn deregister(&mut self, raw: u64) -> Result<(), GpiError> {
        // SAFETY: `raw` is a handle returned by `vhpi_register_cb`.
        let rc = unsafe { vhpi_remove_cb(raw as usize as vhpiHandleT) };
        if rc != 0 {
            return Err(GpiError::backend("vhpi", format!("vhpi_remove_cb failed for {raw:#x}")));
        }
        Ok(())
    }

    fn sim_time(&self) -> SimTime {
        let mut t = vhpiTimeT::default();
        let mut cycles: c_long = 0;
        // SAFETY: both out-pointers are valid for the call.
        unsafe { vhpi_get_time(&mut t, &mut cycles) };
        SimTime::from_words(t.high, t.low)
    }

    fn precision(&self) -> Precision {
        // SAFETY: a null object asks for the design's resolution limit.
        let limit = unsafe { vhpi_get_phys(vhpiResolutionLimitP, ptr::null_mut()) };
        let fs = ((limit.high as i64) << 32) | limit.low as i64;
        if fs <= 0 {
            warn!("simulator reported no resolution limit");
            return Precision::default();
        }
        Precision(fs.ilog10() as i8 - 15)
    }

    fn product(&self) -> String {
        tool_str(vhpiNameP)
    }

    fn version(&self) -> String {
        tool_str(vhpiToolVersionP)
    }

    fn sim_end(&mut self) {
        // SAFETY: `vhpiFinish` takes no further arguments.
        unsafe {
            vhpi_control(vhpiFinish);
        }
    }
}

fn tool_str(property: i32) -> String {
    // SAFETY: a null reference asks for the tool handle.
    let tool = unsafe { vhpi_handle(vhpiTool, ptr::null_mut()) };
    if tool.is_null() {
        return "unknown".into();
    }
    get_str(property, tool).unwrap_or_else(|| "unknown".into())
}

/// Trampoline for every VHPI callback.
unsafe extern "C" fn on_callback(data: *const vhpiCbDataT) {
    if data.is_null() {
        return;
    }
    let data = &*data;
    let (id, edge) = unpack_user_data(data.user_data as usize);
    if data.reason == vhpiCbValueChange && edge != Edge::Any {
        let lsb: Option<Logic> = read_bits(data.obj)
            .filter(|bits| bits.width() > 0)
            .map(|bits| bits.get(0));
        if !edge.accepts(lsb) {
            return;
        }
    }
    host::guarded("vhpi callback", || host::dispatch(id));
}

extern "C" fn startup() {
    host::guarded("vhpi startup", || {
        host::bootstrap(Box::new(VhpiBackend::new()))
    });
}

/// Startup table read by the simulator after loading the library.
#[no_mangle]
#[used]
pub static vhpi_startup_routines: [Option<extern "C" fn()>; 2] = [Some(startup), None];
