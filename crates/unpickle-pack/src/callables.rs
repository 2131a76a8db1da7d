//! The fixed set of callables `REDUCE` and `NEWOBJ` understand.
//!
//! Nothing is ever imported or called: a recognized name selects a
//! reconstruction rule, anything else becomes an opaque object.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Callable {
    /// `numpy.core.multiarray._reconstruct(cls, shape, typecode)`
    Reconstruct,
    /// `numpy.core.multiarray.scalar(dtype, data)`
    Scalar,
    /// `numpy.core.numeric._frombuffer(buf, dtype, shape, order)` (protocol 5)
    FromBuffer,
    /// `numpy.dtype(descr, align, copy)`
    Dtype,
    /// `_codecs.encode(text, encoding)`, used for bytes below protocol 3
    CodecsEncode,
    Set,
    FrozenSet,
    ByteArray,
    List,
    Dict,
    OrderedDict,
    /// `copyreg._reconstructor(cls, base, state)`
    Reconstructor,
    /// `copyreg.__newobj__(cls, *args)`
    NewObj,
}

impl Callable {
    pub(crate) fn lookup(module: &str, name: &str) -> Option<Self> {
        // Python 2 spellings, as remapped by `fix_imports`.
        let module = match module {
            "__builtin__" => "builtins",
            "copy_reg" => "copyreg",
            other => other,
        };
        Some(match (module, name) {
            ("numpy.core.multiarray" | "numpy._core.multiarray", "_reconstruct") => {
                Callable::Reconstruct
            }
            ("numpy.core.multiarray" | "numpy._core.multiarray", "scalar") => Callable::Scalar,
            ("numpy.core.numeric" | "numpy._core.numeric", "_frombuffer") => Callable::FromBuffer,
            ("numpy", "dtype") => Callable::Dtype,
            ("_codecs", "encode") => Callable::CodecsEncode,
            ("builtins", "set") => Callable::Set,
            ("builtins", "frozenset") => Callable::FrozenSet,
            ("builtins", "bytearray") => Callable::ByteArray,
            ("builtins", "list") => Callable::List,
            ("builtins", "dict") => Callable::Dict,
            ("collections", "OrderedDict") => Callable::OrderedDict,
            ("copyreg", "_reconstructor") => Callable::Reconstructor,
            ("copyreg", "__newobj__") => Callable::NewObj,
            _ => return None,
        })
    }
}
