//! Starlark projections of the capability surface.
//!
//! Each capability (and each value a capability hands out) is mirrored by
//! a Starlark value type whose methods delegate to the Rust primitives.
//! Every check -- revocation, confinement, classified segregation, the
//! transform guard -- lives in the Rust layer; these wrappers only move
//! data across the interpreter boundary.

use allocative::Allocative;
use anyhow::anyhow;
use starlark::any::ProvidesStaticType;
use starlark::environment::{Methods, MethodsBuilder, MethodsStatic};
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::values::list::UnpackList;
use starlark::values::none::{NoneOr, NoneType};
use starlark::values::{
    starlark_value, AllocValue, Heap, NoSerialize, StarlarkValue, Value, ValueLike,
};

use crate::capability::{
    FileEntry, FileSystem, GrepMatch, Network, ProcessPermission, ProcessResult,
    DEFAULT_EXEC_TIMEOUT_MS,
};
use crate::classified::{Classified, TransformGuard};

/// Scalar payload a `Classified` value may carry across the interpreter
/// boundary.
#[derive(Clone, Debug, PartialEq, Allocative)]
pub enum ClassifiedData {
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl ClassifiedData {
    /// Converts a Starlark value into a classified payload.
    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        if let Some(b) = value.unpack_bool() {
            return Ok(Self::Bool(b));
        }
        if let Some(i) = value.unpack_i32() {
            return Ok(Self::Int(i64::from(i)));
        }
        if let Some(s) = value.unpack_str() {
            return Ok(Self::Str(s.to_string()));
        }
        if let Some(f) = value.downcast_ref::<starlark::values::float::StarlarkFloat>() {
            return Ok(Self::Float(f.0));
        }
        Err(anyhow!(
            "classified values must be strings, ints, bools, or floats"
        ))
    }

    /// Allocates the payload back into the interpreter heap.
    pub fn to_value<'v>(&self, heap: &'v Heap) -> Value<'v> {
        match self {
            Self::Str(s) => heap.alloc(s.as_str()),
            Self::Int(i) => heap.alloc(*i),
            Self::Bool(b) => Value::new_bool(*b),
            Self::Float(f) => heap.alloc(*f),
        }
    }

    /// Text form used by the classified file/chat sinks.
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

/// `FileSystem` as seen by snippets.
#[derive(Clone, Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct FileSystemValue {
    #[allocative(skip)]
    pub fs: FileSystem,
}

impl std::fmt::Display for FileSystemValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileSystem({})", self.fs.root().display())
    }
}

#[starlark_value(type = "FileSystem")]
impl<'v> StarlarkValue<'v> for FileSystemValue {
    type Canonical = FileSystemValue;

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(filesystem_methods)
    }
}

impl<'v> AllocValue<'v> for FileSystemValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_simple(self)
    }
}

fn expect_fs<'v>(this: Value<'v>) -> anyhow::Result<&'v FileSystemValue> {
    this.downcast_ref::<FileSystemValue>()
        .ok_or_else(|| anyhow!("expected a FileSystem value"))
}

#[starlark_module]
fn filesystem_methods(builder: &mut MethodsBuilder) {
    /// Resolve a path inside the root and return a handle to it.
    fn access<'v>(this: Value<'v>, path: &str) -> anyhow::Result<FileEntryValue> {
        let entry = expect_fs(this)?.fs.access(path)?;
        Ok(FileEntryValue { entry })
    }

    /// Grep one file; returns a list of matches.
    fn grep<'v>(this: Value<'v>, path: &str, pattern: &str) -> anyhow::Result<Vec<GrepMatchValue>> {
        let matches = expect_fs(this)?.fs.grep(path, pattern)?;
        Ok(matches.into_iter().map(GrepMatchValue::new).collect())
    }

    /// Grep every file under a directory whose name matches the glob.
    fn grep_recursive<'v>(
        this: Value<'v>,
        dir: &str,
        pattern: &str,
        glob: &str,
    ) -> anyhow::Result<Vec<GrepMatchValue>> {
        let matches = expect_fs(this)?.fs.grep_recursive(dir, pattern, glob)?;
        Ok(matches.into_iter().map(GrepMatchValue::new).collect())
    }

    /// List absolute paths of files under a directory whose name matches
    /// the glob.
    fn find<'v>(this: Value<'v>, dir: &str, glob: &str) -> anyhow::Result<Vec<String>> {
        let paths = expect_fs(this)?.fs.find(dir, glob)?;
        Ok(paths
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect())
    }
}

/// A file handle as seen by snippets.
#[derive(Clone, Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct FileEntryValue {
    #[allocative(skip)]
    pub entry: FileEntry,
}

impl std::fmt::Display for FileEntryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileEntry({})", self.entry.path().display())
    }
}

#[starlark_value(type = "FileEntry")]
impl<'v> StarlarkValue<'v> for FileEntryValue {
    type Canonical = FileEntryValue;

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(file_entry_methods)
    }
}

impl<'v> AllocValue<'v> for FileEntryValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_simple(self)
    }
}

fn expect_entry<'v>(this: Value<'v>) -> anyhow::Result<&'v FileEntryValue> {
    this.downcast_ref::<FileEntryValue>()
        .ok_or_else(|| anyhow!("expected a FileEntry value"))
}

#[starlark_module]
fn file_entry_methods(builder: &mut MethodsBuilder) {
    fn exists<'v>(this: Value<'v>) -> anyhow::Result<bool> {
        Ok(expect_entry(this)?.entry.exists()?)
    }

    fn is_directory<'v>(this: Value<'v>) -> anyhow::Result<bool> {
        Ok(expect_entry(this)?.entry.is_directory()?)
    }

    fn size<'v>(this: Value<'v>) -> anyhow::Result<i64> {
        Ok(expect_entry(this)?.entry.size()? as i64)
    }

    fn name<'v>(this: Value<'v>) -> anyhow::Result<String> {
        Ok(expect_entry(this)?.entry.name()?)
    }

    fn path<'v>(this: Value<'v>) -> anyhow::Result<String> {
        let entry = expect_entry(this)?;
        Ok(entry.entry.path().to_string_lossy().into_owned())
    }

    fn read<'v>(this: Value<'v>) -> anyhow::Result<String> {
        Ok(expect_entry(this)?.entry.read()?)
    }

    fn read_bytes<'v>(this: Value<'v>) -> anyhow::Result<Vec<i32>> {
        let bytes = expect_entry(this)?.entry.read_bytes()?;
        Ok(bytes.into_iter().map(i32::from).collect())
    }

    fn read_lines<'v>(this: Value<'v>) -> anyhow::Result<Vec<String>> {
        Ok(expect_entry(this)?.entry.read_lines()?)
    }

    fn write<'v>(this: Value<'v>, contents: &str) -> anyhow::Result<NoneType> {
        expect_entry(this)?.entry.write(contents)?;
        Ok(NoneType)
    }

    fn append<'v>(this: Value<'v>, contents: &str) -> anyhow::Result<NoneType> {
        expect_entry(this)?.entry.append(contents)?;
        Ok(NoneType)
    }

    fn delete<'v>(this: Value<'v>) -> anyhow::Result<NoneType> {
        expect_entry(this)?.entry.delete()?;
        Ok(NoneType)
    }

    fn children<'v>(this: Value<'v>) -> anyhow::Result<Vec<FileEntryValue>> {
        let children = expect_entry(this)?.entry.children()?;
        Ok(children
            .into_iter()
            .map(|entry| FileEntryValue { entry })
            .collect())
    }

    fn walk<'v>(this: Value<'v>) -> anyhow::Result<Vec<FileEntryValue>> {
        let files = expect_entry(this)?.entry.walk()?;
        Ok(files
            .into_iter()
            .map(|entry| FileEntryValue { entry })
            .collect())
    }

    fn is_classified<'v>(this: Value<'v>) -> anyhow::Result<bool> {
        Ok(expect_entry(this)?.entry.is_classified()?)
    }

    fn read_classified<'v>(this: Value<'v>) -> anyhow::Result<ClassifiedValue> {
        let secret = expect_entry(this)?.entry.read_classified()?;
        Ok(ClassifiedValue::from_classified(
            secret.map(ClassifiedData::Str),
        ))
    }

    fn write_classified<'v>(this: Value<'v>, value: Value<'v>) -> anyhow::Result<NoneType> {
        let classified = expect_classified(value)?;
        let text = classified.inner.clone().map(|data| data.render());
        expect_entry(this)?.entry.write_classified(&text)?;
        Ok(NoneType)
    }
}

/// `Classified` as seen by snippets: opaque display, pure transforms only.
#[derive(Clone, Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ClassifiedValue {
    #[allocative(skip)]
    pub inner: Classified<ClassifiedData>,
}

impl ClassifiedValue {
    pub fn new(data: ClassifiedData) -> Self {
        Self {
            inner: Classified::new(data),
        }
    }

    pub fn from_classified(inner: Classified<ClassifiedData>) -> Self {
        Self { inner }
    }
}

impl std::fmt::Display for ClassifiedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The one and only rendering of a classified value.
        write!(f, "{}", self.inner)
    }
}

#[starlark_value(type = "Classified")]
impl<'v> StarlarkValue<'v> for ClassifiedValue {
    type Canonical = ClassifiedValue;

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(classified_methods)
    }
}

impl<'v> AllocValue<'v> for ClassifiedValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_simple(self)
    }
}

pub fn expect_classified<'v>(value: Value<'v>) -> anyhow::Result<&'v ClassifiedValue> {
    value
        .downcast_ref::<ClassifiedValue>()
        .ok_or_else(|| anyhow!("expected a Classified value"))
}

#[starlark_module]
fn classified_methods(builder: &mut MethodsBuilder) {
    /// Apply a pure transform to the carried value; capability use inside
    /// the transform fails with a security error.
    fn map<'v>(
        this: Value<'v>,
        f: Value<'v>,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<ClassifiedValue> {
        let data = expect_classified(this)?.inner.clone();
        let heap = eval.heap();
        let _guard = TransformGuard::enter();
        let argument = data.inner().to_value(heap);
        let result = eval
            .eval_function(f, &[argument], &[])
            .map_err(|e| anyhow!(e.to_string()))?;
        let transformed = ClassifiedData::from_value(result)?;
        Ok(ClassifiedValue::new(transformed))
    }

    /// Apply a pure transform that itself returns a Classified value.
    fn flat_map<'v>(
        this: Value<'v>,
        f: Value<'v>,
        eval: &mut Evaluator<'v, '_>,
    ) -> anyhow::Result<ClassifiedValue> {
        let data = expect_classified(this)?.inner.clone();
        let heap = eval.heap();
        let _guard = TransformGuard::enter();
        let argument = data.inner().to_value(heap);
        let result = eval
            .eval_function(f, &[argument], &[])
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(expect_classified(result)?.clone())
    }
}

/// `ProcessPermission` as seen by snippets.
#[derive(Clone, Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ProcessPermissionValue {
    #[allocative(skip)]
    pub permission: ProcessPermission,
}

impl std::fmt::Display for ProcessPermissionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProcessPermission")
    }
}

#[starlark_value(type = "ProcessPermission")]
impl<'v> StarlarkValue<'v> for ProcessPermissionValue {
    type Canonical = ProcessPermissionValue;

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(process_methods)
    }
}

impl<'v> AllocValue<'v> for ProcessPermissionValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_simple(self)
    }
}

fn expect_permission<'v>(this: Value<'v>) -> anyhow::Result<&'v ProcessPermissionValue> {
    this.downcast_ref::<ProcessPermissionValue>()
        .ok_or_else(|| anyhow!("expected a ProcessPermission value"))
}

#[starlark_module]
fn process_methods(builder: &mut MethodsBuilder) {
    /// Launch an allowlisted command and wait for it. Optional trailing
    /// arguments: a working directory, then a timeout in milliseconds.
    fn exec<'v>(
        this: Value<'v>,
        command: &str,
        args: UnpackList<String>,
        working_dir: Option<NoneOr<&str>>,
        timeout_ms: Option<NoneOr<i64>>,
    ) -> anyhow::Result<ProcessResultValue> {
        let working_dir = working_dir.and_then(NoneOr::into_option);
        let timeout = timeout_ms
            .and_then(NoneOr::into_option)
            .map(|t| u64::try_from(t).map_err(|_| anyhow!("timeout_ms must be non-negative")))
            .transpose()?
            .unwrap_or(DEFAULT_EXEC_TIMEOUT_MS);
        let result = expect_permission(this)?.permission.exec(
            command,
            &args.items,
            working_dir.map(std::path::Path::new),
            timeout,
        )?;
        Ok(ProcessResultValue { result })
    }

    /// Launch with the default timeout and return stdout only.
    fn exec_output<'v>(
        this: Value<'v>,
        command: &str,
        args: UnpackList<String>,
    ) -> anyhow::Result<String> {
        Ok(expect_permission(this)?.permission.exec_output(command, &args.items)?)
    }
}

/// `Network` as seen by snippets.
#[derive(Clone, Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct NetworkValue {
    #[allocative(skip)]
    pub network: Network,
}

impl std::fmt::Display for NetworkValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Network")
    }
}

#[starlark_value(type = "Network")]
impl<'v> StarlarkValue<'v> for NetworkValue {
    type Canonical = NetworkValue;

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(network_methods)
    }
}

impl<'v> AllocValue<'v> for NetworkValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_simple(self)
    }
}

fn expect_network<'v>(this: Value<'v>) -> anyhow::Result<&'v NetworkValue> {
    this.downcast_ref::<NetworkValue>()
        .ok_or_else(|| anyhow!("expected a Network value"))
}

#[starlark_module]
fn network_methods(builder: &mut MethodsBuilder) {
    /// Blocking GET against an allowlisted host; returns the body text.
    fn http_get<'v>(this: Value<'v>, url: &str) -> anyhow::Result<String> {
        Ok(expect_network(this)?.network.http_get(url)?)
    }

    /// Blocking POST against an allowlisted host; returns the body text.
    fn http_post<'v>(
        this: Value<'v>,
        url: &str,
        body: &str,
        content_type: &str,
    ) -> anyhow::Result<String> {
        Ok(expect_network(this)?.network.http_post(url, body, content_type)?)
    }
}

/// Outcome of a completed `exec`, exposed as attributes.
#[derive(Clone, Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ProcessResultValue {
    #[allocative(skip)]
    pub result: ProcessResult,
}

impl std::fmt::Display for ProcessResultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProcessResult(exit_code={})", self.result.exit_code)
    }
}

#[starlark_value(type = "ProcessResult")]
impl<'v> StarlarkValue<'v> for ProcessResultValue {
    type Canonical = ProcessResultValue;

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(process_result_methods)
    }
}

impl<'v> AllocValue<'v> for ProcessResultValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_simple(self)
    }
}

fn expect_process_result<'v>(this: Value<'v>) -> anyhow::Result<&'v ProcessResultValue> {
    this.downcast_ref::<ProcessResultValue>()
        .ok_or_else(|| anyhow!("expected a ProcessResult value"))
}

#[starlark_module]
fn process_result_methods(builder: &mut MethodsBuilder) {
    #[starlark(attribute)]
    fn exit_code<'v>(this: Value<'v>) -> anyhow::Result<i32> {
        Ok(expect_process_result(this)?.result.exit_code)
    }

    #[starlark(attribute)]
    fn stdout<'v>(this: Value<'v>) -> anyhow::Result<String> {
        Ok(expect_process_result(this)?.result.stdout.clone())
    }

    #[starlark(attribute)]
    fn stderr<'v>(this: Value<'v>) -> anyhow::Result<String> {
        Ok(expect_process_result(this)?.result.stderr.clone())
    }
}

/// One grep hit, exposed as attributes.
#[derive(Clone, Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct GrepMatchValue {
    #[allocative(skip)]
    pub grep_match: GrepMatch,
}

impl GrepMatchValue {
    pub fn new(grep_match: GrepMatch) -> Self {
        Self { grep_match }
    }
}

impl std::fmt::Display for GrepMatchValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {}",
            self.grep_match.path.display(),
            self.grep_match.line_number,
            self.grep_match.line
        )
    }
}

#[starlark_value(type = "GrepMatch")]
impl<'v> StarlarkValue<'v> for GrepMatchValue {
    type Canonical = GrepMatchValue;

    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(grep_match_methods)
    }
}

impl<'v> AllocValue<'v> for GrepMatchValue {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_simple(self)
    }
}

fn expect_grep_match<'v>(this: Value<'v>) -> anyhow::Result<&'v GrepMatchValue> {
    this.downcast_ref::<GrepMatchValue>()
        .ok_or_else(|| anyhow!("expected a GrepMatch value"))
}

#[starlark_module]
fn grep_match_methods(builder: &mut MethodsBuilder) {
    #[starlark(attribute)]
    fn path<'v>(this: Value<'v>) -> anyhow::Result<String> {
        Ok(expect_grep_match(this)?
            .grep_match
            .path
            .to_string_lossy()
            .into_owned())
    }

    #[starlark(attribute)]
    fn line_number<'v>(this: Value<'v>) -> anyhow::Result<i64> {
        Ok(expect_grep_match(this)?.grep_match.line_number as i64)
    }

    #[starlark(attribute)]
    fn line<'v>(this: Value<'v>) -> anyhow::Result<String> {
        Ok(expect_grep_match(this)?.grep_match.line.clone())
    }
}
