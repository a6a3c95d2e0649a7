//! Verilog Procedural Interface (IEEE 1800 clause 36) adapter.

use std::ffi::{c_char, CString};
use std::ptr;

use gpi_common::{Logic, LogicVec, Precision, SimTime};
use gpi_core::{
    Backend, CallbackId, Edge, GpiError, IterKind, LifecycleEvent, ObjectDesc, ObjectHandle,
    ObjectIter, ObjectType, Phase, Range, SignalValue, ValueFormat, WriteAction,
};
use tracing::{debug, warn};

use crate::host::{self, owned_str, pack_user_data, unpack_user_data};

/// Raw declarations from `vpi_user.h`.
#[allow(non_camel_case_types, non_upper_case_globals, dead_code)]
mod sys {
    use std::ffi::{c_char, c_void};

    pub type PLI_INT32 = i32;
    pub type PLI_UINT32 = u32;
    pub type vpiHandle = *mut c_void;

    // Object types
    pub const vpiConstant: PLI_INT32 = 7;
    pub const vpiIntegerVar: PLI_INT32 = 25;
    pub const vpiMemory: PLI_INT32 = 29;
    pub const vpiMemoryWord: PLI_INT32 = 30;
    pub const vpiModule: PLI_INT32 = 32;
    pub const vpiNet: PLI_INT32 = 36;
    pub const vpiNetBit: PLI_INT32 = 37;
    pub const vpiParameter: PLI_INT32 = 41;
    pub const vpiRealVar: PLI_INT32 = 47;
    pub const vpiReg: PLI_INT32 = 48;
    pub const vpiRegBit: PLI_INT32 = 49;
    pub const vpiNetArray: PLI_INT32 = 114;
    pub const vpiRegArray: PLI_INT32 = 116;
    pub const vpiGenScopeArray: PLI_INT32 = 133;
    pub const vpiGenScope: PLI_INT32 = 134;
    pub const vpiPackage: PLI_INT32 = 600;
    pub const vpiIntVar: PLI_INT32 = 612;
    pub const vpiStringVar: PLI_INT32 = 616;
    pub const vpiEnumVar: PLI_INT32 = 617;
    pub const vpiStructVar: PLI_INT32 = 618;
    pub const vpiBitVar: PLI_INT32 = 620;

    // Relations
    pub const vpiLeftRange: PLI_INT32 = 79;
    pub const vpiRightRange: PLI_INT32 = 83;
    pub const vpiDriver: PLI_INT32 = 91;
    pub const vpiLoad: PLI_INT32 = 93;

    // Properties
    pub const vpiType: PLI_INT32 = 1;
    pub const vpiName: PLI_INT32 = 2;
    pub const vpiFullName: PLI_INT32 = 3;
    pub const vpiSize: PLI_INT32 = 4;
    pub const vpiFile: PLI_INT32 = 5;
    pub const vpiDefName: PLI_INT32 = 9;
    pub const vpiTimePrecision: PLI_INT32 = 12;
    pub const vpiVector: PLI_INT32 = 18;
    pub const vpiPacked: PLI_INT32 = 630;

    // Value formats
    pub const vpiBinStrVal: PLI_INT32 = 1;
    pub const vpiIntVal: PLI_INT32 = 6;
    pub const vpiRealVal: PLI_INT32 = 7;
    pub const vpiStringVal: PLI_INT32 = 8;

    // vpi_put_value flags
    pub const vpiNoDelay: PLI_INT32 = 1;
    pub const vpiInertialDelay: PLI_INT32 = 2;
    pub const vpiForceFlag: PLI_INT32 = 5;
    pub const vpiReleaseFlag: PLI_INT32 = 6;

    // Time types
    pub const vpiSimTime: PLI_INT32 = 2;
    pub const vpiSuppressTime: PLI_INT32 = 3;

    // vpi_control operations
    pub const vpiFinish: PLI_INT32 = 67;

    // Callback reasons
    pub const cbValueChange: PLI_INT32 = 1;
    pub const cbReadWriteSynch: PLI_INT32 = 6;
    pub const cbReadOnlySynch: PLI_INT32 = 7;
    pub const cbNextSimTime: PLI_INT32 = 8;
    pub const cbAfterDelay: PLI_INT32 = 9;
    pub const cbStartOfSimulation: PLI_INT32 = 11;
    pub const cbEndOfSimulation: PLI_INT32 = 12;

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct s_vpi_time {
        pub type_: PLI_INT32,
        pub high: PLI_UINT32,
        pub low: PLI_UINT32,
        pub real: f64,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub union s_vpi_value_union {
        pub str_: *mut c_char,
        pub scalar: PLI_INT32,
        pub integer: PLI_INT32,
        pub real: f64,
        pub misc: *mut c_char,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct s_vpi_value {
        pub format: PLI_INT32,
        pub value: s_vpi_value_union,
    }

    #[repr(C)]
    pub struct s_cb_data {
        pub reason: PLI_INT32,
        pub cb_rtn: Option<unsafe extern "C" fn(*mut s_cb_data) -> PLI_INT32>,
        pub obj: vpiHandle,
        pub time: *mut s_vpi_time,
        pub value: *mut s_vpi_value,
        pub index: PLI_INT32,
        pub user_data: *mut c_char,
    }

    #[repr(C)]
    pub struct s_vpi_vlog_info {
        pub argc: PLI_INT32,
        pub argv: *mut *mut c_char,
        pub product: *mut c_char,
        pub version: *mut c_char,
    }

    extern "C" {
        pub fn vpi_register_cb(cb_data: *mut s_cb_data) -> vpiHandle;
        pub fn vpi_remove_cb(cb: vpiHandle) -> PLI_INT32;
        pub fn vpi_handle(type_: PLI_INT32, refh: vpiHandle) -> vpiHandle;
        pub fn vpi_handle_by_name(name: *const c_char, scope: vpiHandle) -> vpiHandle;
        pub fn vpi_iterate(type_: PLI_INT32, refh: vpiHandle) -> vpiHandle;
        pub fn vpi_scan(iterator: vpiHandle) -> vpiHandle;
        pub fn vpi_get(property: PLI_INT32, object: vpiHandle) -> PLI_INT32;
        pub fn vpi_get_str(property: PLI_INT32, object: vpiHandle) -> *mut c_char;
        pub fn vpi_get_value(expr: vpiHandle, value: *mut s_vpi_value);
        pub fn vpi_put_value(
            object: vpiHandle,
            value: *mut s_vpi_value,
            time: *mut s_vpi_time,
            flags: PLI_INT32,
        ) -> vpiHandle;
        pub fn vpi_get_time(object: vpiHandle, time: *mut s_vpi_time);
        pub fn vpi_get_vlog_info(info: *mut s_vpi_vlog_info) -> PLI_INT32;
        pub fn vpi_free_object(object: vpiHandle) -> PLI_INT32;
        pub fn vpi_control(operation: PLI_INT32, ...) -> PLI_INT32;
    }

    pub fn null_time() -> s_vpi_time {
        s_vpi_time {
            type_: vpiSimTime,
            high: 0,
            low: 0,
            real: 0.0,
        }
    }

    pub fn empty_value(format: PLI_INT32) -> s_vpi_value {
        s_vpi_value {
            format,
            value: s_vpi_value_union {
                str_: std::ptr::null_mut(),
            },
        }
    }
}

use sys::*;

/// Object types walked when iterating the children of a scope.
const CHILD_TYPES: [PLI_INT32; 12] = [
    vpiModule,
    vpiGenScopeArray,
    vpiNet,
    vpiReg,
    vpiNetArray,
    vpiRegArray,
    vpiMemory,
    vpiParameter,
    vpiIntegerVar,
    vpiRealVar,
    vpiStringVar,
    vpiStructVar,
];

/// Backend over the simulator's VPI.
///
/// Object handles carry the native `vpiHandle` as their raw value. The
/// adapter itself is stateless.
#[derive(Default)]
pub struct VpiBackend;

impl VpiBackend {
    /// Creates the adapter.
    pub fn new() -> Self {
        Self
    }

    fn lookup(name: &str) -> Option<vpiHandle> {
        let name = CString::new(name).ok()?;
        // SAFETY: `name` is a valid C string for the duration of the call.
        let h = unsafe { vpi_handle_by_name(name.as_ptr(), ptr::null_mut()) };
        (!h.is_null()).then_some(h)
    }

    fn handle_of(obj: &ObjectHandle) -> Result<vpiHandle, GpiError> {
        Self::lookup(obj.full_name())
            .ok_or_else(|| GpiError::ObjectNotFound(obj.full_name().to_string()))
    }

    fn register(
        reason: PLI_INT32,
        obj: vpiHandle,
        mut time: s_vpi_time,
        value_format: Option<PLI_INT32>,
        user_data: usize,
    ) -> Result<u64, GpiError> {
        let mut value = empty_value(value_format.unwrap_or(vpiBinStrVal));
        let mut data = s_cb_data {
            reason,
            cb_rtn: Some(on_callback),
            obj,
            time: &mut time,
            value: if value_format.is_some() {
                &mut value as *mut s_vpi_value
            } else {
                ptr::null_mut()
            },
            index: 0,
            user_data: user_data as *mut c_char,
        };
        // SAFETY: the simulator copies `data`, `time` and `value` before
        // returning; the user data is an integer, never dereferenced.
        let cb = unsafe { vpi_register_cb(&mut data) };
        if cb.is_null() {
            return Err(GpiError::RegistrationFailure(format!(
                "vpi_register_cb refused reason {reason}"
            )));
        }
        Ok(cb as usize as u64)
    }
}

/// Copies a string property of `h`.
fn get_str(property: PLI_INT32, h: vpiHandle) -> Option<String> {
    // SAFETY: `h` came from the simulator; the returned buffer is copied
    // before any further VPI call.
    unsafe { owned_str(vpi_get_str(property, h)) }
}

fn get_int(property: PLI_INT32, h: vpiHandle) -> PLI_INT32 {
    // SAFETY: `h` came from the simulator.
    unsafe { vpi_get(property, h) }
}

/// Integer value of a range bound expression.
fn bound(relation: PLI_INT32, h: vpiHandle) -> Option<i32> {
    // SAFETY: `h` came from the simulator; the bound handle is freed here.
    unsafe {
        let expr = vpi_handle(relation, h);
        if expr.is_null() {
            return None;
        }
        let mut value = empty_value(vpiIntVal);
        vpi_get_value(expr, &mut value);
        vpi_free_object(expr);
        Some(value.value.integer)
    }
}

fn classify(vtype: PLI_INT32, size: PLI_INT32) -> ObjectType {
    match vtype {
        vpiModule | vpiGenScope => ObjectType::Module,
        vpiGenScopeArray => ObjectType::GenArray,
        vpiPackage => ObjectType::Package,
        vpiNet | vpiReg | vpiBitVar | vpiNetBit | vpiRegBit | vpiMemoryWord => {
            if size > 1 {
                ObjectType::LogicArray
            } else {
                ObjectType::Logic
            }
        }
        vpiNetArray | vpiRegArray => ObjectType::Array,
        vpiMemory => ObjectType::Memory,
        vpiIntegerVar | vpiIntVar | vpiParameter | vpiConstant => ObjectType::Integer,
        vpiRealVar => ObjectType::Real,
        vpiStringVar => ObjectType::String,
        vpiEnumVar => ObjectType::Enum,
        vpiStructVar => ObjectType::Structure,
        _ => ObjectType::Unknown,
    }
}

fn describe(h: vpiHandle) -> ObjectDesc {
    let vtype = get_int(vpiType, h);
    let size = get_int(vpiSize, h);
    let kind = classify(vtype, size);
    let name = get_str(vpiName, h).unwrap_or_default();
    let full_name = get_str(vpiFullName, h).unwrap_or_else(|| name.clone());
    let mut desc = ObjectDesc::new(h as usize as u64, name, full_name, kind);
    desc.is_const = matches!(vtype, vpiParameter | vpiConstant);
    desc.num_elems = (size > 0).then_some(size as u32);
    desc.indexable = matches!(
        kind,
        ObjectType::LogicArray | ObjectType::Array | ObjectType::Memory | ObjectType::GenArray
    );
    if desc.indexable {
        if let (Some(left), Some(right)) = (bound(vpiLeftRange, h), bound(vpiRightRange, h)) {
            desc.range = Some(Range::new(left, right));
        }
    }
    if kind == ObjectType::Module {
        desc.definition_name = get_str(vpiDefName, h);
        desc.definition_file = get_str(vpiFile, h);
    }
    desc
}

/// Drains a VPI iterator into descriptions. A null iterator is empty.
fn scan_all(iter: vpiHandle) -> Vec<ObjectDesc> {
    let mut out = Vec::new();
    if iter.is_null() {
        return out;
    }
    loop {
        // SAFETY: `iter` is a live iterator; the simulator frees it once
        // `vpi_scan` returns null.
        let h = unsafe { vpi_scan(iter) };
        if h.is_null() {
            break;
        }
        out.push(describe(h));
    }
    out
}

fn iterate_type(vtype: PLI_INT32, parent: vpiHandle) -> Vec<ObjectDesc> {
    // SAFETY: `parent` is null or came from the simulator.
    scan_all(unsafe { vpi_iterate(vtype, parent) })
}

impl Backend for VpiBackend {
    fn name(&self) -> &str {
        "vpi"
    }

    fn root(&mut self, name: Option<&str>) -> Result<ObjectDesc, GpiError> {
        iterate_type(vpiModule, ptr::null_mut())
            .into_iter()
            .find(|d| name.map_or(true, |n| d.name == n))
            .ok_or_else(|| GpiError::ObjectNotFound(name.unwrap_or("<root>").to_string()))
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
        Ok(Self::lookup(&format!("{}[{}]", parent.full_name(), index)).map(describe))
    }

    fn iterate(
        &mut self,
        parent: Option<&ObjectHandle>,
        kind: IterKind,
    ) -> Result<ObjectIter, GpiError> {
        let parent = parent.map(Self::handle_of).transpose()?;
        let scope = parent.unwrap_or(ptr::null_mut());
        let descs: Vec<ObjectDesc> = match kind {
            IterKind::Children if parent.is_none() => iterate_type(vpiModule, scope),
            IterKind::Children => CHILD_TYPES
                .iter()
                .flat_map(|&t| iterate_type(t, scope))
                .collect(),
            IterKind::Drivers => iterate_type(vpiDriver, scope),
            IterKind::Loads => iterate_type(vpiLoad, scope),
            IterKind::PackageScopes => iterate_type(vpiPackage, ptr::null_mut()),
        };
        Ok(Box::new(descs.into_iter()))
    }

    fn get_value(&mut self, obj: &ObjectHandle, format: ValueFormat) -> Result<SignalValue, GpiError> {
        let h = Self::handle_of(obj)?;
        let vformat = match format {
            ValueFormat::BinStr => vpiBinStrVal,
            ValueFormat::Int => vpiIntVal,
            ValueFormat::Real => vpiRealVal,
            ValueFormat::Bytes => vpiStringVal,
        };
        let mut value = empty_value(vformat);
        // SAFETY: `h` came from the simulator; string results are copied
        // before the next VPI call.
        unsafe {
            vpi_get_value(h, &mut value);
            match format {
                ValueFormat::Int => Ok(SignalValue::Int(value.value.integer)),
                ValueFormat::Real => Ok(SignalValue::Real(value.value.real)),
                ValueFormat::Bytes => Ok(SignalValue::Bytes(
                    owned_str(value.value.str_).unwrap_or_default().into_bytes(),
                )),
                ValueFormat::BinStr => {
                    let text = owned_str(value.value.str_).unwrap_or_default();
                    LogicVec::from_binary_str(&text)
                        .map(SignalValue::BinStr)
                        .ok_or_else(|| {
                            GpiError::backend(
                                "vpi",
                                format!("unreadable value '{text}' on {}", obj.full_name()),
                            )
                        })
                }
            }
        }
    }

    fn set_value(
        &mut self,
        obj: &ObjectHandle,
        value: &SignalValue,
        action: WriteAction,
    ) -> Result<(), GpiError> {
        let h = Self::handle_of(obj)?;
        let flags = match action {
            WriteAction::Deposit => vpiInertialDelay,
            WriteAction::NoDelay => vpiNoDelay,
            WriteAction::Force => vpiForceFlag,
            WriteAction::Release => vpiReleaseFlag,
        };
        // Keeps the string alive across the call.
        let mut text: Option<CString> = None;
        let mut native = match value {
            SignalValue::Int(v) => {
                let mut n = empty_value(vpiIntVal);
                n.value.integer = *v;
                n
            }
            SignalValue::Real(v) => {
                let mut n = empty_value(vpiRealVal);
                n.value.real = *v;
                n
            }
            SignalValue::BinStr(bits) => {
                let s = text.insert(CString::new(bits.to_string()).map_err(|e| {
                    GpiError::InvalidArgument(e.to_string())
                })?);
                let mut n = empty_value(vpiBinStrVal);
                n.value.str_ = s.as_ptr() as *mut c_char;
                n
            }
            SignalValue::Bytes(bytes) => {
                let s = text.insert(
                    CString::new(bytes.clone())
                        .map_err(|e| GpiError::InvalidArgument(e.to_string()))?,
                );
                let mut n = empty_value(vpiStringVal);
                n.value.str_ = s.as_ptr() as *mut c_char;
                n
            }
        };
        let mut when = null_time();
        // SAFETY: `native` and `when` outlive the call and any string they
        // point to is held in `text`.
        unsafe {
            vpi_put_value(h, &mut native, &mut when, flags);
        }
        debug!(object = obj.full_name(), ?action, %value, "vpi_put_value");
        Ok(())
    }

    fn register_timed(&mut self, steps: u64, id: CallbackId) -> Result<u64, GpiError> {
        let (high, low) = SimTime::from_steps(steps).to_words();
        let time = s_vpi_time {
            type_: vpiSimTime,
            high,
            low,
            real: 0.0,
        };
        Self::register(
            cbAfterDelay,
            ptr::null_mut(),
            time,
            None,
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
        let time = s_vpi_time {
            type_: vpiSuppressTime,
            ..null_time()
        };
        Self::register(
            cbValueChange,
            h,
            time,
            Some(vpiBinStrVal),
            pack_user_data(id, edge),
        )
    }

    fn register_phase(&mut self, phase: Phase, id: CallbackId) -> Result<u64, GpiError> {
        let reason = match phase {
            Phase::ReadWrite => cbReadWriteSynch,
            Phase::ReadOnly => cbReadOnlySynch,
            Phase::NextTimeStep => cbNextSimTime,
        };
        Self::register(
            reason,
            ptr::null_mut(),
            null_time(),
            None,
            pack_user_data(id, Edge::Any),
        )
    }

    fn register_lifecycle(&mut self, event: LifecycleEvent, id: CallbackId) -> Result<u64, GpiError> {
        let reason = match event {
            LifecycleEvent::StartOfSim => cbStartOfSimulation,
            LifecycleEvent::EndOfSim => cbEndOfSimulation,
        };
        Self::register(
            reason,
            ptr::null_mut(),
            null_time(),
            None,
            pack_user_data(id, Edge::Any),
        )
    }

    fn deregister(&mut self, raw: u64) -> Result<(), GpiError> {
        // SAFETY: `raw` is a callback handle returned by `vpi_register_cb`.
        let ok = unsafe { vpi_remove_cb(raw as usize as vpiHandle) };
        if ok == 0 {
            return Err(GpiError::backend("vpi", format!("vpi_remove_cb failed for {raw:#x}")));
        }
        Ok(())
    }

    fn sim_time(&self) -> SimTime {
        let mut t = null_time();
        // SAFETY: a null object asks for the simulation time.
        unsafe { vpi_get_time(ptr::null_mut(), &mut t) };
        SimTime::from_words(t.high, t.low)
    }

    fn precision(&self) -> Precision {
        let exp = get_int(vpiTimePrecision, ptr::null_mut());
        i8::try_from(exp).map(Precision).unwrap_or_default()
    }

    fn product(&self) -> String {
        vlog_info().0
    }

    fn version(&self) -> String {
        vlog_info().1
    }

    fn sim_end(&mut self) {
        // SAFETY: `vpiFinish` takes one integer diagnostic level.
        unsafe {
            vpi_control(vpiFinish, 1 as PLI_INT32);
        }
    }
}

fn vlog_info() -> (String, String) {
    let mut info = s_vpi_vlog_info {
        argc: 0,
        argv: ptr::null_mut(),
        product: ptr::null_mut(),
        version: ptr::null_mut(),
    };
    // SAFETY: the simulator fills `info` with pointers to its own buffers.
    unsafe {
        if vpi_get_vlog_info(&mut info) == 0 {
            warn!("vpi_get_vlog_info failed");
            return ("unknown".into(), "unknown".into());
        }
        (
            owned_str(info.product).unwrap_or_default(),
            owned_str(info.version).unwrap_or_default(),
        )
    }
}

/// Least significant bit of a binary-string callback value.
///
/// # Safety
///
/// `value` must be null or point to a value the simulator filled in.
unsafe fn callback_lsb(value: *const s_vpi_value) -> Option<Logic> {
    if value.is_null() || (*value).format != vpiBinStrVal {
        return None;
    }
    owned_str((*value).value.str_)?
        .chars()
        .last()
        .and_then(Logic::from_char)
}

/// Trampoline for every VPI callback.
unsafe extern "C" fn on_callback(data: *mut s_cb_data) -> PLI_INT32 {
    if data.is_null() {
        return 0;
    }
    let data = &*data;
    let (id, edge) = unpack_user_data(data.user_data as usize);
    if data.reason == cbValueChange && !edge.accepts(callback_lsb(data.value)) {
        return 0;
    }
    host::guarded("vpi callback", || host::dispatch(id));
    0
}

extern "C" fn startup() {
    host::guarded("vpi startup", || {
        host::bootstrap(Box::new(VpiBackend::new()))
    });
}

/// Startup table read by the simulator after loading the library.
#[no_mangle]
#[used]
pub static vlog_startup_routines: [Option<extern "C" fn()>; 2] = [Some(startup), None];

/// Entry point for simulators that call a bootstrap function by name
/// instead of reading [`vlog_startup_routines`].
#[no_mangle]
pub extern "C" fn vlog_startup_routines_bootstrap() {
    startup();
}
