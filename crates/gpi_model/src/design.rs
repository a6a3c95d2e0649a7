//! The model design: a tree of scopes and value objects built in code.
//!
//! Objects live in an arena keyed by [`ObjId`]; names are interned.
//! The raw value handed to the runtime for an object is its ID plus one, so
//! zero never names an object.

use crate::error::ModelError;
use crate::kernel::ModelSim;
use gpi_common::{Ident, LogicVec};
use gpi_core::{IterKind, ObjectDesc, ObjectType, Range, SignalValue};

gpi_core::define_id!(
    /// Opaque ID of an object in a model design.
    ObjId
);

impl ObjId {
    /// The raw handle value given to the runtime.
    pub fn to_handle(self) -> u64 {
        u64::from(self.as_raw()) + 1
    }

    /// Inverse of [`to_handle`](Self::to_handle).
    pub fn from_handle(raw: u64) -> Option<Self> {
        let index = raw.checked_sub(1)?;
        u32::try_from(index).ok().map(ObjId::from_raw)
    }
}

/// Combinational process body: input values in, output value out.
pub type ProcessFn = Box<dyn Fn(&[LogicVec]) -> LogicVec>;

pub(crate) struct ModelObject {
    pub(crate) name: Ident,
    pub(crate) full_name: String,
    pub(crate) kind: ObjectType,
    pub(crate) parent: Option<ObjId>,
    pub(crate) children: Vec<ObjId>,
    /// Position in the parent array.
    pub(crate) index: Option<i32>,
    pub(crate) range: Option<Range>,
    pub(crate) definition: Option<String>,
    pub(crate) is_const: bool,
    /// Integer reads sign-extend.
    pub(crate) signed: bool,
    /// `None` for scopes.
    pub(crate) value: Option<SignalValue>,
    pub(crate) forced: Option<SignalValue>,
    /// Value as of the last value-change notification.
    pub(crate) settled: Option<SignalValue>,
}

impl ModelObject {
    fn new(name: Ident, full_name: String, kind: ObjectType, parent: Option<ObjId>) -> Self {
        Self {
            name,
            full_name,
            kind,
            parent,
            children: Vec::new(),
            index: None,
            range: None,
            definition: None,
            is_const: false,
            signed: false,
            value: None,
            forced: None,
            settled: None,
        }
    }

    /// The value readers see: a force wins over the underlying value.
    pub(crate) fn effective(&self) -> Option<&SignalValue> {
        self.forced.as_ref().or(self.value.as_ref())
    }

    pub(crate) fn width(&self) -> Option<u32> {
        match self.value.as_ref()? {
            SignalValue::BinStr(bits) => Some(bits.width()),
            _ => None,
        }
    }
}

pub(crate) struct ModelProcess {
    pub(crate) inputs: Vec<ObjId>,
    pub(crate) output: ObjId,
    pub(crate) eval: ProcessFn,
}

impl ModelSim {
    fn insert(
        &mut self,
        parent: Option<ObjId>,
        name: &str,
        kind: ObjectType,
    ) -> Result<ObjId, ModelError> {
        if self.find_child(parent, name).is_some() {
            let parent_name = match parent {
                Some(p) => self.objects[p].full_name.clone(),
                None => "<root>".to_string(),
            };
            return Err(ModelError::DuplicateName {
                parent: parent_name,
                name: name.to_string(),
            });
        }
        let full_name = match parent {
            Some(p) => format!("{}.{name}", self.objects[p].full_name),
            None => name.to_string(),
        };
        let ident = self.interner.get_or_intern(name);
        let id = self
            .objects
            .alloc(ModelObject::new(ident, full_name, kind, parent));
        match parent {
            Some(p) => self.objects[p].children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    fn find_child(&self, parent: Option<ObjId>, name: &str) -> Option<ObjId> {
        let ident = self.interner.get(name)?;
        let siblings = match parent {
            Some(p) => &self.objects.try_get(p)?.children,
            None => &self.roots,
        };
        siblings
            .iter()
            .copied()
            .find(|&c| self.objects[c].name == ident)
    }

    fn scope(&self, id: ObjId) -> Result<(), ModelError> {
        match self.objects.try_get(id) {
            Some(obj) if obj.kind.is_scope() => Ok(()),
            Some(obj) => Err(ModelError::TypeMismatch {
                object: obj.full_name.clone(),
                reason: "not a scope".into(),
            }),
            None => Err(ModelError::UnknownObject(format!("{id:?}"))),
        }
    }

    /// Adds a module scope. `parent` of `None` makes a root.
    pub fn add_scope(
        &mut self,
        parent: Option<ObjId>,
        name: &str,
        definition: &str,
    ) -> Result<ObjId, ModelError> {
        if let Some(p) = parent {
            self.scope(p)?;
        }
        let id = self.insert(parent, name, ObjectType::Module)?;
        self.objects[id].definition = Some(definition.to_string());
        Ok(id)
    }

    /// Adds a root package scope.
    pub fn add_package(&mut self, name: &str) -> Result<ObjId, ModelError> {
        let id = self.insert(None, name, ObjectType::Package)?;
        self.objects[id].definition = Some(name.to_string());
        Ok(id)
    }

    /// Adds a logic signal of `width` bits, initially all zero.
    pub fn add_signal(&mut self, parent: ObjId, name: &str, width: u32) -> Result<ObjId, ModelError> {
        self.add_signal_with(parent, name, LogicVec::new(width))
    }

    /// Adds a logic signal with an initial value.
    pub fn add_signal_with(
        &mut self,
        parent: ObjId,
        name: &str,
        initial: LogicVec,
    ) -> Result<ObjId, ModelError> {
        self.scope(parent)?;
        let width = initial.width();
        let kind = if width == 1 {
            ObjectType::Logic
        } else {
            ObjectType::LogicArray
        };
        let id = self.insert(Some(parent), name, kind)?;
        let obj = &mut self.objects[id];
        if width > 1 {
            obj.range = Some(Range::new(width as i32 - 1, 0));
        }
        obj.value = Some(SignalValue::BinStr(initial));
        Ok(id)
    }

    /// Adds a signal declared signed: integer reads sign-extend it.
    pub fn add_signed_signal(
        &mut self,
        parent: ObjId,
        name: &str,
        width: u32,
    ) -> Result<ObjId, ModelError> {
        let id = self.add_signal(parent, name, width)?;
        self.objects[id].signed = true;
        Ok(id)
    }

    /// Adds an integer parameter that refuses writes.
    pub fn add_const(&mut self, parent: ObjId, name: &str, value: i32) -> Result<ObjId, ModelError> {
        let id = self.add_integer(parent, name)?;
        let obj = &mut self.objects[id];
        obj.is_const = true;
        obj.value = Some(SignalValue::Int(value));
        Ok(id)
    }

    /// Adds a 32-bit integer variable, initially zero.
    pub fn add_integer(&mut self, parent: ObjId, name: &str) -> Result<ObjId, ModelError> {
        self.scope(parent)?;
        let id = self.insert(Some(parent), name, ObjectType::Integer)?;
        self.objects[id].value = Some(SignalValue::Int(0));
        Ok(id)
    }

    /// Adds a real variable, initially zero.
    pub fn add_real(&mut self, parent: ObjId, name: &str) -> Result<ObjId, ModelError> {
        self.scope(parent)?;
        let id = self.insert(Some(parent), name, ObjectType::Real)?;
        self.objects[id].value = Some(SignalValue::Real(0.0));
        Ok(id)
    }

    /// Adds a string variable, initially empty.
    pub fn add_string(&mut self, parent: ObjId, name: &str) -> Result<ObjId, ModelError> {
        self.scope(parent)?;
        let id = self.insert(Some(parent), name, ObjectType::String)?;
        self.objects[id].value = Some(SignalValue::Bytes(Vec::new()));
        Ok(id)
    }

    /// Adds an array of `elem_width`-bit signals indexed over `range`.
    ///
    /// Elements are named `name[i]`, take the full name `<array>[i]` and
    /// are selected with a child-by-index lookup.
    pub fn add_array(
        &mut self,
        parent: ObjId,
        name: &str,
        range: Range,
        elem_width: u32,
    ) -> Result<ObjId, ModelError> {
        self.scope(parent)?;
        let id = self.insert(Some(parent), name, ObjectType::Array)?;
        self.objects[id].range = Some(range);
        for index in range.indices() {
            let elem = self.add_signal_with(id, &format!("{name}[{index}]"), LogicVec::new(elem_width))?;
            let full_name = format!("{}[{index}]", self.objects[id].full_name);
            let obj = &mut self.objects[elem];
            obj.index = Some(index);
            obj.full_name = full_name;
        }
        Ok(id)
    }

    /// Adds a combinational process recomputing `output` whenever one of
    /// `inputs` changes.
    pub fn add_process<F>(&mut self, inputs: &[ObjId], output: ObjId, eval: F) -> Result<(), ModelError>
    where
        F: Fn(&[LogicVec]) -> LogicVec + 'static,
    {
        for &id in inputs.iter().chain(std::iter::once(&output)) {
            if self.objects.try_get(id).and_then(|o| o.value.as_ref()).is_none() {
                return Err(ModelError::UnknownObject(format!("{id:?}")));
            }
        }
        self.processes.push(ModelProcess {
            inputs: inputs.to_vec(),
            output,
            eval: Box::new(eval),
        });
        Ok(())
    }

    /// Looks up an object by dotted path. A trailing `[i]` on a path
    /// segment selects an array element.
    pub fn find(&self, path: &str) -> Option<ObjId> {
        let mut parts = path.split('.');
        let mut current = self.find_child(None, parts.next()?)?;
        for part in parts {
            current = self
                .find_child(Some(current), part)
                .or_else(|| self.find_element(current, part))?;
        }
        Some(current)
    }

    fn find_element(&self, parent: ObjId, part: &str) -> Option<ObjId> {
        let (base, rest) = part.split_once('[')?;
        let index = rest.strip_suffix(']')?.parse().ok()?;
        let array = self.find_child(Some(parent), base)?;
        self.child_at(array, index)
    }

    /// Full hierarchical name of an object.
    pub fn full_name(&self, id: ObjId) -> Option<&str> {
        self.objects.try_get(id).map(|o| o.full_name.as_str())
    }

    /// Number of objects in the design.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn object(&self, id: ObjId) -> Result<&ModelObject, ModelError> {
        self.objects
            .try_get(id)
            .ok_or_else(|| ModelError::UnknownObject(format!("{id:?}")))
    }

    /// Resolves a raw handle value back to an object.
    pub fn resolve(&self, raw: u64) -> Result<ObjId, ModelError> {
        ObjId::from_handle(raw)
            .filter(|id| self.objects.try_get(*id).is_some())
            .ok_or_else(|| ModelError::UnknownObject(format!("handle {raw:#x}")))
    }

    /// A root scope by name, or the first root for `None`.
    pub fn root(&self, name: Option<&str>) -> Result<ObjId, ModelError> {
        let found = match name {
            None => self
                .roots
                .iter()
                .copied()
                .find(|&r| self.objects[r].kind == ObjectType::Module),
            Some(n) => self
                .find_child(None, n)
                .filter(|&r| self.objects[r].kind == ObjectType::Module),
        };
        found.ok_or_else(|| ModelError::UnknownObject(name.unwrap_or("<root>").to_string()))
    }

    /// A direct child by leaf name.
    pub fn child(&self, parent: ObjId, name: &str) -> Option<ObjId> {
        self.find_child(Some(parent), name)
    }

    /// An array element by index.
    pub fn child_at(&self, parent: ObjId, index: i32) -> Option<ObjId> {
        let obj = self.objects.try_get(parent)?;
        obj.children
            .iter()
            .copied()
            .find(|&c| self.objects[c].index == Some(index))
    }

    /// Objects related to `parent`.
    ///
    /// Drivers of a signal are the inputs of the processes computing it;
    /// loads are the outputs of the processes reading it.
    pub fn related(&self, parent: Option<ObjId>, kind: IterKind) -> Vec<ObjId> {
        match (kind, parent) {
            (IterKind::Children, None) => self.roots.clone(),
            (IterKind::Children, Some(p)) => self
                .objects
                .try_get(p)
                .map(|o| o.children.clone())
                .unwrap_or_default(),
            (IterKind::PackageScopes, _) => self
                .roots
                .iter()
                .copied()
                .filter(|&r| self.objects[r].kind == ObjectType::Package)
                .collect(),
            (IterKind::Drivers, Some(p)) => self
                .processes
                .iter()
                .filter(|proc| proc.output == p)
                .flat_map(|proc| proc.inputs.iter().copied())
                .collect(),
            (IterKind::Loads, Some(p)) => self
                .processes
                .iter()
                .filter(|proc| proc.inputs.contains(&p))
                .map(|proc| proc.output)
                .collect(),
            (IterKind::Drivers | IterKind::Loads, None) => Vec::new(),
        }
    }

    /// The description handed to the runtime on discovery.
    pub fn describe(&self, id: ObjId) -> Result<ObjectDesc, ModelError> {
        let obj = self.object(id)?;
        let mut desc = ObjectDesc::new(
            id.to_handle(),
            self.interner.resolve(obj.name),
            obj.full_name.clone(),
            obj.kind,
        );
        desc.is_const = obj.is_const;
        desc.range = obj.range;
        desc.indexable = matches!(obj.kind, ObjectType::Array | ObjectType::LogicArray);
        desc.num_elems = match obj.kind {
            ObjectType::Array => Some(obj.children.len() as u32),
            _ => obj.width(),
        };
        desc.definition_name = obj.definition.clone();
        Ok(desc)
    }

    /// Parent of an object.
    pub fn parent(&self, id: ObjId) -> Option<ObjId> {
        self.objects.try_get(id).and_then(|o| o.parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpi_common::Precision;

    fn design() -> (ModelSim, ObjId) {
        let mut sim = ModelSim::new(Precision::NS);
        let top = sim.add_scope(None, "top", "top_tb").unwrap();
        sim.add_signal(top, "clk", 1).unwrap();
        sim.add_signal(top, "data", 8).unwrap();
        sim.add_const(top, "WIDTH", 8).unwrap();
        (sim, top)
    }

    #[test]
    fn handles_round_trip() {
        let id = ObjId::from_raw(4);
        assert_eq!(id.to_handle(), 5);
        assert_eq!(ObjId::from_handle(5), Some(id));
        assert_eq!(ObjId::from_handle(0), None);
    }

    #[test]
    fn paths_resolve() {
        let (sim, top) = design();
        let clk = sim.find("top.clk").unwrap();
        assert_eq!(sim.full_name(clk), Some("top.clk"));
        assert_eq!(sim.parent(clk), Some(top));
        assert!(sim.find("top.missing").is_none());
        assert!(sim.find("other").is_none());
    }

    #[test]
    fn duplicate_names_rejected() {
        let (mut sim, top) = design();
        let err = sim.add_signal(top, "clk", 1).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName { .. }));
    }

    #[test]
    fn signals_need_a_scope_parent() {
        let (mut sim, _) = design();
        let clk = sim.find("top.clk").unwrap();
        assert!(matches!(
            sim.add_signal(clk, "inner", 1),
            Err(ModelError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn describe_reports_attributes() {
        let (sim, top) = design();
        let data = sim.describe(sim.find("top.data").unwrap()).unwrap();
        assert_eq!(data.kind, ObjectType::LogicArray);
        assert_eq!(data.num_elems, Some(8));
        assert_eq!(data.range, Some(Range::new(7, 0)));
        assert!(data.indexable);
        let width = sim.describe(sim.find("top.WIDTH").unwrap()).unwrap();
        assert!(width.is_const);
        let scope = sim.describe(top).unwrap();
        assert_eq!(scope.definition_name.as_deref(), Some("top_tb"));
    }

    #[test]
    fn arrays_index_by_range() {
        let (mut sim, top) = design();
        let mem = sim.add_array(top, "mem", Range::new(3, 0), 4).unwrap();
        let e0 = sim.child_at(mem, 0).unwrap();
        assert_eq!(sim.full_name(e0), Some("top.mem[0]"));
        assert_eq!(sim.find("top.mem[0]"), Some(e0));
        assert!(sim.child_at(mem, 4).is_none());
        assert_eq!(sim.describe(mem).unwrap().num_elems, Some(4));
    }

    #[test]
    fn root_lookup_skips_packages() {
        let (mut sim, top) = design();
        let pkg = sim.add_package("types_pkg").unwrap();
        assert_eq!(sim.root(None).unwrap(), top);
        assert!(sim.root(Some("types_pkg")).is_err());
        assert_eq!(sim.related(None, IterKind::PackageScopes), vec![pkg]);
    }

    #[test]
    fn drivers_and_loads_follow_processes() {
        let (mut sim, top) = design();
        let a = sim.add_signal(top, "a", 1).unwrap();
        let y = sim.add_signal(top, "y", 1).unwrap();
        sim.add_process(&[a], y, |ins| !&ins[0]).unwrap();
        assert_eq!(sim.related(Some(y), IterKind::Drivers), vec![a]);
        assert_eq!(sim.related(Some(a), IterKind::Loads), vec![y]);
        assert!(sim.related(Some(a), IterKind::Drivers).is_empty());
    }
}
