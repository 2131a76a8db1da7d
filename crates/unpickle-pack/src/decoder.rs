//! Safe pickle decoder.
//!
//! The decoder interprets the pickle opcode stream the way Python's
//! unpickler does, except that it never imports or calls anything. Objects
//! live in an arena and the stack and memo hold arena ids, so a container
//! memoized before it is filled (`EMPTY_DICT`, `BINPUT`, `SETITEMS`) is seen
//! filled when fetched back with `BINGET`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::mem;

use unpickle_buffers::{latin1_decode, latin1_encode, BufferError, Reader};

use crate::callables::Callable;
use crate::constants::{op, HIGHEST_PROTOCOL, MAX_DEPTH};
use crate::dtype::{Dtype, ElementKind};
use crate::value::{element_count, fortran_to_c, ArrayData, NdArray, NdScalar, PickleValue};
use crate::PickleError;

type NodeId = usize;

#[derive(Debug)]
enum Node {
    None,
    Bool(bool),
    Int(i64),
    BigInt(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    List(Vec<NodeId>),
    Tuple(Vec<NodeId>),
    Dict(Vec<(NodeId, NodeId)>),
    Set(Vec<NodeId>),
    FrozenSet(Vec<NodeId>),
    Global { module: String, name: String },
    Dtype(Dtype),
    /// `_reconstruct` result waiting for its `BUILD` state.
    PendingArray,
    Array(NdArray),
    ObjectArray {
        dtype: Dtype,
        shape: Vec<usize>,
        items: Vec<NodeId>,
    },
    Scalar(NdScalar),
    Object { module: String, name: String },
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::None => "None",
            Node::Bool(_) => "bool",
            Node::Int(_) | Node::BigInt(_) => "int",
            Node::Float(_) => "float",
            Node::Str(_) => "str",
            Node::Bytes(_) => "bytes",
            Node::ByteArray(_) => "bytearray",
            Node::List(_) => "list",
            Node::Tuple(_) => "tuple",
            Node::Dict(_) => "dict",
            Node::Set(_) => "set",
            Node::FrozenSet(_) => "frozenset",
            Node::Global { .. } => "global",
            Node::Dtype(_) => "dtype",
            Node::PendingArray | Node::Array(_) | Node::ObjectArray { .. } => "ndarray",
            Node::Scalar(_) => "numpy scalar",
            Node::Object { .. } => "object",
        }
    }

    fn int(value: i128) -> Node {
        i64::try_from(value).map_or(Node::BigInt(value), Node::Int)
    }
}

/// Pickle decoder for protocols 0 through 5.
///
/// # Example
///
/// ```
/// use unpickle_pack::{PickleDecoder, PickleValue};
///
/// // pickle.dumps({"a": 1}, protocol=2)
/// let data = b"\x80\x02}q\x00X\x01\x00\x00\x00aq\x01K\x01s.";
/// let mut decoder = PickleDecoder::new();
/// let value = decoder.decode(data).unwrap();
/// assert_eq!(value, PickleValue::dict([("a", PickleValue::Int(1))]));
/// assert_eq!(decoder.protocol(), 2);
/// ```
pub struct PickleDecoder {
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
    metastack: Vec<Vec<NodeId>>,
    memo: HashMap<u64, NodeId>,
    protocol: u8,
    opcodes: usize,
    /// Offset of the opcode being executed.
    offset: usize,
}

impl Default for PickleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PickleDecoder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            stack: Vec::new(),
            metastack: Vec::new(),
            memo: HashMap::new(),
            protocol: 0,
            opcodes: 0,
            offset: 0,
        }
    }

    /// Protocol announced by the last decoded pickle (0 when it had no
    /// `PROTO` opcode).
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Number of opcodes executed by the last [`decode`](Self::decode).
    pub fn opcode_count(&self) -> usize {
        self.opcodes
    }

    /// Number of distinct objects created by the last decode.
    pub fn object_count(&self) -> usize {
        self.nodes.len()
    }

    /// Decodes one pickle from the start of `data`. Bytes after `STOP` are
    /// ignored.
    pub fn decode(&mut self, data: &[u8]) -> Result<PickleValue, PickleError> {
        self.reset();
        let mut reader = Reader::new(data);
        let root = self.run(&mut reader)?;
        self.materialize(root)
    }

    fn reset(&mut self) {
        self.nodes.clear();
        self.stack.clear();
        self.metastack.clear();
        self.memo.clear();
        self.protocol = 0;
        self.opcodes = 0;
        self.offset = 0;
    }

    fn run(&mut self, r: &mut Reader<'_>) -> Result<NodeId, PickleError> {
        loop {
            self.offset = r.x;
            let opcode = r.u8().map_err(|_| PickleError::MissingStop)?;
            self.opcodes += 1;
            match opcode {
                op::PROTO => {
                    let version = r.u8()?;
                    if version > HIGHEST_PROTOCOL {
                        return Err(PickleError::UnsupportedProtocol(version));
                    }
                    self.protocol = version;
                }
                op::FRAME => {
                    // Frames only bound reads; the whole pickle is in memory.
                    r.u64_le()?;
                }
                op::STOP => return self.pop(),
                op::MARK => {
                    let stack = mem::take(&mut self.stack);
                    self.metastack.push(stack);
                }
                op::POP => {
                    if self.stack.pop().is_none() {
                        self.pop_mark()?;
                    }
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?;
                    self.stack.push(top);
                }

                // Memo.
                op::PUT => {
                    let key = self.parse_line(r.line()?, "memo key")?;
                    self.memo_put(key)?;
                }
                op::BINPUT => {
                    let key = r.u8()?;
                    self.memo_put(key.into())?;
                }
                op::LONG_BINPUT => {
                    let key = r.u32_le()?;
                    self.memo_put(key.into())?;
                }
                op::MEMOIZE => {
                    let key = self.memo.len() as u64;
                    self.memo_put(key)?;
                }
                op::GET => {
                    let key = self.parse_line(r.line()?, "memo key")?;
                    self.memo_get(key)?;
                }
                op::BINGET => {
                    let key = r.u8()?;
                    self.memo_get(key.into())?;
                }
                op::LONG_BINGET => {
                    let key = r.u32_le()?;
                    self.memo_get(key.into())?;
                }

                // Scalars.
                op::NONE => self.push(Node::None),
                op::NEWTRUE => self.push(Node::Bool(true)),
                op::NEWFALSE => self.push(Node::Bool(false)),
                op::INT => {
                    let node = self.load_int(r.line()?)?;
                    self.push(node);
                }
                op::BININT => {
                    let value = r.i32_le()?;
                    self.push(Node::Int(value.into()));
                }
                op::BININT1 => {
                    let value = r.u8()?;
                    self.push(Node::Int(value.into()));
                }
                op::BININT2 => {
                    let value = r.u16_le()?;
                    self.push(Node::Int(value.into()));
                }
                op::LONG => {
                    let line = r.line()?;
                    let digits = line.strip_suffix(b"L").unwrap_or(line);
                    let value: i128 = self.parse_line(digits, "long")?;
                    self.push(Node::int(value));
                }
                op::LONG1 => {
                    let len = r.u8()?;
                    let value = self.decode_long(r.buf(len.into())?)?;
                    self.push(Node::int(value));
                }
                op::LONG4 => {
                    let len = self.length_i32(r)?;
                    let value = self.decode_long(r.buf(len)?)?;
                    self.push(Node::int(value));
                }
                op::FLOAT => {
                    let value: f64 = self.parse_line(r.line()?, "float")?;
                    self.push(Node::Float(value));
                }
                op::BINFLOAT => {
                    let value = r.f64_be()?;
                    self.push(Node::Float(value));
                }

                // Text and binary strings.
                op::STRING => {
                    let bytes = self.load_string_literal(r.line()?)?;
                    self.push(Node::Str(latin1_decode(&bytes)));
                }
                op::BINSTRING => {
                    let len = self.length_i32(r)?;
                    let text = latin1_decode(r.buf(len)?);
                    self.push(Node::Str(text));
                }
                op::SHORT_BINSTRING => {
                    let len = r.u8()?;
                    let text = latin1_decode(r.buf(len.into())?);
                    self.push(Node::Str(text));
                }
                op::UNICODE => {
                    let line = r.line()?;
                    let text = decode_raw_unicode_escape(line).ok_or_else(|| {
                        self.invalid_literal("unicode", line)
                    })?;
                    self.push(Node::Str(text));
                }
                op::BINUNICODE => {
                    let len = r.u32_le()?;
                    let text = self.read_utf8(r, len.into())?;
                    self.push(Node::Str(text));
                }
                op::SHORT_BINUNICODE => {
                    let len = r.u8()?;
                    let text = self.read_utf8(r, len.into())?;
                    self.push(Node::Str(text));
                }
                op::BINUNICODE8 => {
                    let len = r.u64_le()?;
                    let text = self.read_utf8(r, len)?;
                    self.push(Node::Str(text));
                }
                op::BINBYTES => {
                    let len = r.u32_le()?;
                    let bytes = r.buf(length(len.into()))?.to_vec();
                    self.push(Node::Bytes(bytes));
                }
                op::SHORT_BINBYTES => {
                    let len = r.u8()?;
                    let bytes = r.buf(len.into())?.to_vec();
                    self.push(Node::Bytes(bytes));
                }
                op::BINBYTES8 => {
                    let len = r.u64_le()?;
                    let bytes = r.buf(length(len))?.to_vec();
                    self.push(Node::Bytes(bytes));
                }
                op::BYTEARRAY8 => {
                    let len = r.u64_le()?;
                    let bytes = r.buf(length(len))?.to_vec();
                    self.push(Node::ByteArray(bytes));
                }

                // Containers.
                op::EMPTY_LIST => self.push(Node::List(Vec::new())),
                op::APPEND => {
                    let item = self.pop()?;
                    let list = self.top()?;
                    self.extend_list(list, vec![item])?;
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    let list = self.top()?;
                    self.extend_list(list, items)?;
                }
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.push(Node::List(items));
                }
                op::EMPTY_TUPLE => self.push(Node::Tuple(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.push(Node::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = usize::from(opcode - op::TUPLE1) + 1;
                    let items = self.pop_n(n)?;
                    self.push(Node::Tuple(items));
                }
                op::EMPTY_DICT => self.push(Node::Dict(Vec::new())),
                op::DICT => {
                    let items = self.pop_mark()?;
                    let pairs = self.pairs(items)?;
                    self.push(Node::Dict(pairs));
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let dict = self.top()?;
                    self.extend_dict(dict, vec![(key, value)])?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = self.pairs(items)?;
                    let dict = self.top()?;
                    self.extend_dict(dict, pairs)?;
                }
                op::EMPTY_SET => self.push(Node::Set(Vec::new())),
                op::ADDITEMS => {
                    let items = self.pop_mark()?;
                    let set = self.top()?;
                    self.extend_set(set, items)?;
                }
                op::FROZENSET => {
                    let items = self.pop_mark()?;
                    self.push(Node::FrozenSet(items));
                }

                // Classes and reconstruction.
                op::GLOBAL => {
                    let module = self.line_utf8(r)?;
                    let name = self.line_utf8(r)?;
                    self.push(Node::Global { module, name });
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let node = Node::Global {
                        module: self.str_at(module)?.to_string(),
                        name: self.str_at(name)?.to_string(),
                    };
                    self.push(node);
                }
                op::REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let node = self.reduce(callable, args)?;
                    self.push(node);
                }
                op::BUILD => {
                    let state = self.pop()?;
                    let target = self.top()?;
                    self.build(target, state)?;
                }
                op::NEWOBJ => {
                    let _args = self.pop()?;
                    let class = self.pop()?;
                    let node = self.new_object(class)?;
                    self.push(node);
                }
                op::NEWOBJ_EX => {
                    let _kwargs = self.pop()?;
                    let _args = self.pop()?;
                    let class = self.pop()?;
                    let node = self.new_object(class)?;
                    self.push(node);
                }
                op::INST => {
                    let module = self.line_utf8(r)?;
                    let name = self.line_utf8(r)?;
                    self.pop_mark()?;
                    self.push(instantiate(module, name));
                }
                op::OBJ => {
                    let items = self.pop_mark()?;
                    let class = *items
                        .first()
                        .ok_or(PickleError::StackUnderflow(self.offset))?;
                    let node = self.new_object(class)?;
                    self.push(node);
                }

                op::PERSID | op::BINPERSID => {
                    return Err(self.unsupported(opcode, "persistent ids"));
                }
                op::EXT1 | op::EXT2 | op::EXT4 => {
                    return Err(self.unsupported(opcode, "extension registry"));
                }
                op::NEXT_BUFFER | op::READONLY_BUFFER => {
                    return Err(self.unsupported(opcode, "out-of-band buffers"));
                }
                _ => {
                    return Err(PickleError::UnknownOpcode {
                        opcode,
                        offset: self.offset,
                    })
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Stack and memo

    fn push(&mut self, node: Node) {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.stack.push(id);
    }

    fn pop(&mut self) -> Result<NodeId, PickleError> {
        self.stack
            .pop()
            .ok_or(PickleError::StackUnderflow(self.offset))
    }

    fn top(&self) -> Result<NodeId, PickleError> {
        self.stack
            .last()
            .copied()
            .ok_or(PickleError::StackUnderflow(self.offset))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<NodeId>, PickleError> {
        if self.stack.len() < n {
            return Err(PickleError::StackUnderflow(self.offset));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_mark(&mut self) -> Result<Vec<NodeId>, PickleError> {
        let outer = self
            .metastack
            .pop()
            .ok_or(PickleError::MarkNotFound(self.offset))?;
        Ok(mem::replace(&mut self.stack, outer))
    }

    fn memo_put(&mut self, key: u64) -> Result<(), PickleError> {
        let id = self.top()?;
        self.memo.insert(key, id);
        Ok(())
    }

    fn memo_get(&mut self, key: u64) -> Result<(), PickleError> {
        let id = *self.memo.get(&key).ok_or(PickleError::MemoKeyNotFound {
            key,
            offset: self.offset,
        })?;
        self.stack.push(id);
        Ok(())
    }

    fn pairs(&self, items: Vec<NodeId>) -> Result<Vec<(NodeId, NodeId)>, PickleError> {
        if items.len() % 2 != 0 {
            return Err(PickleError::StackUnderflow(self.offset));
        }
        Ok(items.chunks_exact(2).map(|kv| (kv[0], kv[1])).collect())
    }

    // Instances of unmodeled subclasses swallow their items.

    fn extend_list(&mut self, list: NodeId, items: Vec<NodeId>) -> Result<(), PickleError> {
        match &mut self.nodes[list] {
            Node::List(existing) => existing.extend(items),
            Node::Object { .. } => {}
            other => return Err(unexpected("list", other, self.offset)),
        }
        Ok(())
    }

    fn extend_dict(&mut self, dict: NodeId, pairs: Vec<(NodeId, NodeId)>) -> Result<(), PickleError> {
        match &mut self.nodes[dict] {
            Node::Dict(existing) => existing.extend(pairs),
            Node::Object { .. } => {}
            other => return Err(unexpected("dict", other, self.offset)),
        }
        Ok(())
    }

    fn extend_set(&mut self, set: NodeId, items: Vec<NodeId>) -> Result<(), PickleError> {
        match &mut self.nodes[set] {
            Node::Set(existing) => existing.extend(items),
            Node::Object { .. } => {}
            other => return Err(unexpected("set", other, self.offset)),
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Literals

    fn parse_line<T: std::str::FromStr>(
        &self,
        line: &[u8],
        what: &'static str,
    ) -> Result<T, PickleError> {
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| self.invalid_literal(what, line))
    }

    fn load_int(&self, line: &[u8]) -> Result<Node, PickleError> {
        // Protocol 0 spells booleans as INT 00 / INT 01.
        match line {
            b"00" => Ok(Node::Bool(false)),
            b"01" => Ok(Node::Bool(true)),
            _ => self.parse_line::<i128>(line, "int").map(Node::int),
        }
    }

    /// Little-endian two's complement, as written by `LONG1`/`LONG4`.
    fn decode_long(&self, bytes: &[u8]) -> Result<i128, PickleError> {
        let Some(last) = bytes.last() else {
            return Ok(0);
        };
        let negative = last & 0x80 != 0;
        let fill = if negative { 0xff } else { 0x00 };
        if bytes.len() > 16 {
            let extra_is_sign = bytes[16..].iter().all(|b| *b == fill);
            let top_bit_matches = (bytes[15] & 0x80 != 0) == negative;
            if !extra_is_sign || !top_bit_matches {
                return Err(PickleError::IntegerTooLarge(self.offset));
            }
        }
        let mut buf = [fill; 16];
        let n = bytes.len().min(16);
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(i128::from_le_bytes(buf))
    }

    fn load_string_literal(&self, line: &[u8]) -> Result<Vec<u8>, PickleError> {
        let quoted = match line {
            [b'\'', inner @ .., b'\''] | [b'"', inner @ .., b'"'] => Some(inner),
            _ => None,
        };
        quoted
            .and_then(unescape_string)
            .ok_or_else(|| self.invalid_literal("string", line))
    }

    fn length_i32(&self, r: &mut Reader<'_>) -> Result<usize, PickleError> {
        let len = r.i32_le()?;
        usize::try_from(len).map_err(|_| PickleError::NegativeLength {
            length: len.into(),
            offset: self.offset,
        })
    }

    fn read_utf8(&self, r: &mut Reader<'_>, len: u64) -> Result<String, PickleError> {
        match r.utf8(length(len)) {
            Ok(s) => Ok(s.to_string()),
            Err(BufferError::InvalidUtf8 { .. }) => Err(PickleError::InvalidUtf8(self.offset)),
            Err(err) => Err(err.into()),
        }
    }

    fn line_utf8(&self, r: &mut Reader<'_>) -> Result<String, PickleError> {
        let line = r.line()?;
        std::str::from_utf8(line)
            .map(str::to_string)
            .map_err(|_| PickleError::InvalidUtf8(self.offset))
    }

    fn invalid_literal(&self, what: &'static str, literal: &[u8]) -> PickleError {
        PickleError::InvalidLiteral {
            what,
            literal: String::from_utf8_lossy(literal).into_owned(),
            offset: self.offset,
        }
    }

    fn unsupported(&self, opcode: u8, reason: &'static str) -> PickleError {
        PickleError::UnsupportedOpcode {
            opcode,
            offset: self.offset,
            reason,
        }
    }

    // -----------------------------------------------------------------
    // Typed node access

    fn str_at(&self, id: NodeId) -> Result<&str, PickleError> {
        match &self.nodes[id] {
            Node::Str(s) => Ok(s),
            other => Err(unexpected("str", other, self.offset)),
        }
    }

    fn global_at(&self, id: NodeId) -> Result<(String, String), PickleError> {
        match &self.nodes[id] {
            Node::Global { module, name } => Ok((module.clone(), name.clone())),
            other => Err(unexpected("class", other, self.offset)),
        }
    }

    fn tuple_at(&self, id: NodeId) -> Result<Vec<NodeId>, PickleError> {
        match &self.nodes[id] {
            Node::Tuple(items) => Ok(items.clone()),
            other => Err(unexpected("tuple", other, self.offset)),
        }
    }

    fn items_at(&self, id: NodeId) -> Result<Vec<NodeId>, PickleError> {
        match &self.nodes[id] {
            Node::List(items) | Node::Tuple(items) | Node::Set(items) | Node::FrozenSet(items) => {
                Ok(items.clone())
            }
            other => Err(unexpected("iterable", other, self.offset)),
        }
    }

    fn bool_at(&self, id: NodeId) -> Result<bool, PickleError> {
        match &self.nodes[id] {
            Node::Bool(b) => Ok(*b),
            Node::Int(i) => Ok(*i != 0),
            other => Err(unexpected("bool", other, self.offset)),
        }
    }

    fn dtype_at(&self, id: NodeId) -> Result<Dtype, PickleError> {
        match &self.nodes[id] {
            Node::Dtype(dtype) => Ok(*dtype),
            other => Err(unexpected("dtype", other, self.offset)),
        }
    }

    fn shape_at(&self, id: NodeId) -> Result<Vec<usize>, PickleError> {
        let dims = self.items_at(id)?;
        dims.into_iter()
            .map(|dim| match &self.nodes[dim] {
                Node::Int(n) => usize::try_from(*n).map_err(|_| PickleError::InvalidArguments {
                    callable: "ndarray shape".to_string(),
                    offset: self.offset,
                }),
                other => Err(unexpected("int", other, self.offset)),
            })
            .collect()
    }

    /// Raw bytes of an array or scalar payload. Protocol 0-2 pickles written
    /// by Python 2 carry them as latin-1 text.
    fn payload_at(&self, id: NodeId) -> Result<Cow<'_, [u8]>, PickleError> {
        match &self.nodes[id] {
            Node::Bytes(b) | Node::ByteArray(b) => Ok(Cow::Borrowed(b)),
            Node::Str(s) => latin1_encode(s)
                .map(Cow::Owned)
                .ok_or_else(|| unexpected("bytes", &self.nodes[id], self.offset)),
            other => Err(unexpected("bytes", other, self.offset)),
        }
    }

    // -----------------------------------------------------------------
    // Reconstruction

    fn reduce(&self, callable: NodeId, args: NodeId) -> Result<Node, PickleError> {
        let (module, name) = self.global_at(callable)?;
        let args = self.tuple_at(args)?;
        let Some(target) = Callable::lookup(&module, &name) else {
            return Ok(Node::Object { module, name });
        };
        let invalid = || PickleError::InvalidArguments {
            callable: format!("{module}.{name}"),
            offset: self.offset,
        };
        match (target, args.as_slice()) {
            (Callable::Reconstruct, [_, _, _]) => Ok(Node::PendingArray),
            (Callable::Dtype, [descr, ..]) => Ok(Node::Dtype(Dtype::parse(self.str_at(*descr)?)?)),
            (Callable::FromBuffer, [buf, dtype, shape, order]) => {
                let dtype = self.dtype_at(*dtype)?;
                let shape = self.shape_at(*shape)?;
                let fortran = self.str_at(*order)? == "F";
                self.array(dtype, shape, fortran, *buf)
            }
            (Callable::Scalar, [dtype, data]) => {
                let dtype = self.dtype_at(*dtype)?;
                let value = dtype.decode_scalar(&self.payload_at(*data)?)?;
                Ok(Node::Scalar(NdScalar { dtype, value }))
            }
            (Callable::CodecsEncode, [text]) => Ok(Node::Bytes(self.str_at(*text)?.as_bytes().to_vec())),
            (Callable::CodecsEncode, [text, encoding]) => {
                let bytes = encode_text(self.str_at(*text)?, self.str_at(*encoding)?)
                    .ok_or_else(invalid)??;
                Ok(Node::Bytes(bytes))
            }
            (Callable::ByteArray, []) => Ok(Node::ByteArray(Vec::new())),
            (Callable::ByteArray, [data]) => Ok(Node::ByteArray(self.payload_at(*data)?.into_owned())),
            (Callable::ByteArray, [text, encoding]) => {
                let bytes = encode_text(self.str_at(*text)?, self.str_at(*encoding)?)
                    .ok_or_else(invalid)??;
                Ok(Node::ByteArray(bytes))
            }
            (Callable::Set, []) => Ok(Node::Set(Vec::new())),
            (Callable::Set, [items]) => Ok(Node::Set(self.items_at(*items)?)),
            (Callable::FrozenSet, []) => Ok(Node::FrozenSet(Vec::new())),
            (Callable::FrozenSet, [items]) => Ok(Node::FrozenSet(self.items_at(*items)?)),
            (Callable::List, []) => Ok(Node::List(Vec::new())),
            (Callable::List, [items]) => Ok(Node::List(self.items_at(*items)?)),
            (Callable::Dict | Callable::OrderedDict, []) => Ok(Node::Dict(Vec::new())),
            (Callable::Dict | Callable::OrderedDict, [items]) => {
                let mut pairs = Vec::new();
                for item in self.items_at(*items)? {
                    match self.items_at(item)?.as_slice() {
                        [key, value] => pairs.push((*key, *value)),
                        _ => return Err(invalid()),
                    }
                }
                Ok(Node::Dict(pairs))
            }
            (Callable::Reconstructor, [class, ..]) | (Callable::NewObj, [class, ..]) => {
                self.new_object(*class)
            }
            _ => Err(invalid()),
        }
    }

    fn new_object(&self, class: NodeId) -> Result<Node, PickleError> {
        let (module, name) = self.global_at(class)?;
        Ok(instantiate(module, name))
    }

    fn build(&mut self, target: NodeId, state: NodeId) -> Result<(), PickleError> {
        match self.nodes[target] {
            Node::PendingArray => {
                let array = self.array_from_state(state)?;
                self.nodes[target] = array;
            }
            Node::Dtype(mut dtype) => {
                self.apply_dtype_state(&mut dtype, state)?;
                self.nodes[target] = Node::Dtype(dtype);
            }
            // Opaque instances and container subclasses keep no state.
            Node::Object { .. } | Node::Dict(_) | Node::List(_) | Node::Set(_) => {}
            ref other => {
                if !matches!(self.nodes[state], Node::None) {
                    return Err(unexpected("object with state", other, self.offset));
                }
            }
        }
        Ok(())
    }

    /// `ndarray.__setstate__((version, shape, dtype, is_fortran, data))`;
    /// the version field is absent in very old pickles.
    fn array_from_state(&self, state: NodeId) -> Result<Node, PickleError> {
        let fields = self.tuple_at(state)?;
        let (shape, dtype, fortran, payload) = match fields.as_slice() {
            [_, shape, dtype, fortran, payload] | [shape, dtype, fortran, payload] => {
                (*shape, *dtype, *fortran, *payload)
            }
            _ => {
                return Err(PickleError::InvalidArguments {
                    callable: "ndarray.__setstate__".to_string(),
                    offset: self.offset,
                })
            }
        };
        let shape = self.shape_at(shape)?;
        let dtype = self.dtype_at(dtype)?;
        let fortran = self.bool_at(fortran)?;
        self.array(dtype, shape, fortran, payload)
    }

    fn array(
        &self,
        dtype: Dtype,
        shape: Vec<usize>,
        fortran: bool,
        payload: NodeId,
    ) -> Result<Node, PickleError> {
        if dtype.kind == ElementKind::Object {
            let items = self.items_at(payload)?;
            let expected = element_count(&shape).unwrap_or(usize::MAX);
            if items.len() != expected {
                return Err(PickleError::ArrayShapeMismatch {
                    shape,
                    expected,
                    actual: items.len(),
                });
            }
            let items = if fortran { fortran_to_c(items, &shape) } else { items };
            return Ok(Node::ObjectArray { dtype, shape, items });
        }
        let data = dtype.decode_elements(&self.payload_at(payload)?)?;
        let mut array = NdArray::new(dtype, shape, data)?;
        if fortran {
            array.data = array.data.fortran_to_c(&array.shape);
        }
        Ok(Node::Array(array))
    }

    /// `dtype.__setstate__((version, byteorder, subarray, names, fields, ...))`.
    fn apply_dtype_state(&self, dtype: &mut Dtype, state: NodeId) -> Result<(), PickleError> {
        let fields = self.tuple_at(state)?;
        let Some(order) = fields.get(1) else {
            return Err(PickleError::InvalidArguments {
                callable: "dtype.__setstate__".to_string(),
                offset: self.offset,
            });
        };
        let structured = fields
            .iter()
            .skip(2)
            .take(2)
            .any(|id| !matches!(self.nodes[*id], Node::None));
        if structured {
            return Err(PickleError::UnsupportedDtype(format!(
                "structured {}",
                dtype.descr()
            )));
        }
        dtype.set_byte_order(self.str_at(*order)?)
    }

    // -----------------------------------------------------------------
    // Arena → value tree

    /// Builds the value tree rooted at `root` with an explicit stack of open
    /// containers, so nesting depth never grows the call stack.
    fn materialize(&self, root: NodeId) -> Result<PickleValue, PickleError> {
        let mut visiting = vec![false; self.nodes.len()];
        let mut open: Vec<OpenNode<'_>> = Vec::new();
        let mut finished = self.enter(root, &mut open, &mut visiting)?;
        while let Some(parent) = open.last_mut() {
            if let Some(value) = finished.take() {
                parent.values.push(value);
            }
            match parent.next_child() {
                Some(child) => finished = self.enter(child, &mut open, &mut visiting)?,
                None => {
                    if let Some(done) = open.pop() {
                        visiting[done.id] = false;
                        finished = Some(self.close(done));
                    }
                }
            }
        }
        finished.ok_or(PickleError::StackUnderflow(self.offset))
    }

    /// Returns leaves directly; containers are pushed onto `open` and `None`
    /// is returned until all their children are built.
    fn enter<'a>(
        &'a self,
        id: NodeId,
        open: &mut Vec<OpenNode<'a>>,
        visiting: &mut [bool],
    ) -> Result<Option<PickleValue>, PickleError> {
        if open.len() >= MAX_DEPTH {
            return Err(PickleError::NestingTooDeep(MAX_DEPTH));
        }
        if visiting[id] {
            return Err(PickleError::CircularReference);
        }
        let children = match &self.nodes[id] {
            Node::None => return Ok(Some(PickleValue::None)),
            Node::Bool(b) => return Ok(Some(PickleValue::Bool(*b))),
            Node::Int(i) => return Ok(Some(PickleValue::Int(*i))),
            Node::BigInt(i) => return Ok(Some(PickleValue::BigInt(*i))),
            Node::Float(f) => return Ok(Some(PickleValue::Float(*f))),
            Node::Str(s) => return Ok(Some(PickleValue::Str(s.clone()))),
            Node::Bytes(b) => return Ok(Some(PickleValue::Bytes(b.clone()))),
            Node::ByteArray(b) => return Ok(Some(PickleValue::ByteArray(b.clone()))),
            Node::Global { module, name } => {
                return Ok(Some(PickleValue::Global {
                    module: module.clone(),
                    name: name.clone(),
                }))
            }
            Node::Dtype(_) => {
                return Ok(Some(PickleValue::Object {
                    module: "numpy".to_string(),
                    name: "dtype".to_string(),
                }))
            }
            Node::PendingArray => return Err(PickleError::IncompleteArray),
            Node::Array(array) => return Ok(Some(PickleValue::Array(array.clone()))),
            Node::Scalar(scalar) => return Ok(Some(PickleValue::Scalar(scalar.clone()))),
            Node::Object { module, name } => {
                return Ok(Some(PickleValue::Object {
                    module: module.clone(),
                    name: name.clone(),
                }))
            }
            Node::List(items)
            | Node::Tuple(items)
            | Node::Set(items)
            | Node::FrozenSet(items)
            | Node::ObjectArray { items, .. } => Children::Items(items),
            Node::Dict(pairs) => Children::Pairs(pairs),
        };
        visiting[id] = true;
        open.push(OpenNode {
            id,
            children,
            next: 0,
            values: Vec::with_capacity(children.len()),
        });
        Ok(None)
    }

    fn close(&self, done: OpenNode<'_>) -> PickleValue {
        let values = done.values;
        match &self.nodes[done.id] {
            Node::Tuple(_) => PickleValue::Tuple(values),
            Node::Set(_) => PickleValue::Set(values),
            Node::FrozenSet(_) => PickleValue::FrozenSet(values),
            Node::Dict(_) => {
                let mut values = values.into_iter();
                let mut pairs = Vec::with_capacity(values.len() / 2);
                while let (Some(key), Some(value)) = (values.next(), values.next()) {
                    pairs.push((key, value));
                }
                PickleValue::Dict(pairs)
            }
            Node::ObjectArray { dtype, shape, .. } => PickleValue::Array(NdArray {
                dtype: *dtype,
                shape: shape.clone(),
                data: ArrayData::Object(values),
            }),
            // Only containers are ever opened.
            _ => PickleValue::List(values),
        }
    }
}

/// Child ids of a container being materialized.
#[derive(Clone, Copy)]
enum Children<'a> {
    Items(&'a [NodeId]),
    /// Dict pairs, visited key then value.
    Pairs(&'a [(NodeId, NodeId)]),
}

impl Children<'_> {
    fn len(&self) -> usize {
        match self {
            Children::Items(items) => items.len(),
            Children::Pairs(pairs) => pairs.len() * 2,
        }
    }
}

struct OpenNode<'a> {
    id: NodeId,
    children: Children<'a>,
    next: usize,
    values: Vec<PickleValue>,
}

impl OpenNode<'_> {
    fn next_child(&mut self) -> Option<NodeId> {
        let index = self.next;
        self.next += 1;
        match self.children {
            Children::Items(items) => items.get(index).copied(),
            Children::Pairs(pairs) => pairs
                .get(index / 2)
                .map(|(key, value)| if index % 2 == 0 { *key } else { *value }),
        }
    }
}

fn unexpected(expected: &'static str, found: &Node, offset: usize) -> PickleError {
    PickleError::UnexpectedValue {
        expected,
        found: found.kind(),
        offset,
    }
}

/// Lengths beyond the address space can never be satisfied; saturating makes
/// the following read fail as truncated input.
fn length(len: u64) -> usize {
    usize::try_from(len).unwrap_or(usize::MAX)
}

/// The empty instance a class reference stands for.
fn instantiate(module: String, name: String) -> Node {
    match Callable::lookup(&module, &name) {
        Some(Callable::Set) => Node::Set(Vec::new()),
        Some(Callable::FrozenSet) => Node::FrozenSet(Vec::new()),
        Some(Callable::List) => Node::List(Vec::new()),
        Some(Callable::Dict | Callable::OrderedDict) => Node::Dict(Vec::new()),
        Some(Callable::ByteArray) => Node::ByteArray(Vec::new()),
        _ => Node::Object { module, name },
    }
}

/// `codecs.encode(text, encoding)` for the encodings pickles use. Returns
/// `None` when the text cannot be represented, `Some(Err)` for unknown
/// encodings.
fn encode_text(text: &str, encoding: &str) -> Option<Result<Vec<u8>, PickleError>> {
    let normalized = encoding.to_ascii_lowercase().replace(['-', '_'], "");
    match normalized.as_str() {
        "latin1" | "iso88591" | "l1" => latin1_encode(text).map(Ok),
        "utf8" => Some(Ok(text.as_bytes().to_vec())),
        "ascii" => text.is_ascii().then(|| Ok(text.as_bytes().to_vec())),
        _ => Some(Err(PickleError::UnsupportedEncoding(encoding.to_string()))),
    }
}

/// Python's `escape_decode`, used for protocol 0 `STRING` literals.
fn unescape_string(raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let esc = *raw.get(i)?;
        i += 1;
        match esc {
            b'\n' => {}
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(esc - b'0');
                for _ in 0..2 {
                    match raw.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            b'x' => {
                let hex = std::str::from_utf8(raw.get(i..i + 2)?).ok()?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 2;
            }
            _ => {
                out.push(b'\\');
                out.push(esc);
            }
        }
    }
    Some(out)
}

/// Python's `raw-unicode-escape` codec: `\uXXXX` and `\UXXXXXXXX` escapes,
/// every other byte is a latin-1 code point.
fn decode_raw_unicode_escape(raw: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let width = match raw.get(i + 1) {
                Some(b'u') => 4,
                Some(b'U') => 8,
                _ => 0,
            };
            if width > 0 {
                let hex = std::str::from_utf8(raw.get(i + 2..i + 2 + width)?).ok()?;
                out.push(char::from_u32(u32::from_str_radix(hex, 16).ok()?)?);
                i += 2 + width;
                continue;
            }
        }
        out.push(char::from(raw[i]));
        i += 1;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &[u8]) -> Result<PickleValue, PickleError> {
        PickleDecoder::new().decode(data)
    }

    #[test]
    fn protocol_0_scalars() {
        assert_eq!(decode(b"I42\n."), Ok(PickleValue::Int(42)));
        assert_eq!(decode(b"I01\n."), Ok(PickleValue::Bool(true)));
        assert_eq!(decode(b"I00\n."), Ok(PickleValue::Bool(false)));
        assert_eq!(decode(b"L123L\n."), Ok(PickleValue::Int(123)));
        assert_eq!(decode(b"F1.5\n."), Ok(PickleValue::Float(1.5)));
        assert_eq!(decode(b"N."), Ok(PickleValue::None));
        assert_eq!(
            decode(b"I99999999999999999999\n."),
            Ok(PickleValue::BigInt(99_999_999_999_999_999_999))
        );
    }

    #[test]
    fn protocol_0_strings() {
        assert_eq!(decode(b"S'a\\nb'\n."), Ok(PickleValue::str("a\nb")));
        assert_eq!(decode(b"S\"it's\"\n."), Ok(PickleValue::str("it's")));
        assert_eq!(decode(b"S'\\xe9'\n."), Ok(PickleValue::str("\u{e9}")));
        assert_eq!(
            decode(b"Vcaf\\u00e9 \\u005c\n."),
            Ok(PickleValue::str("caf\u{e9} \\"))
        );
        assert!(matches!(
            decode(b"Sunquoted\n."),
            Err(PickleError::InvalidLiteral { what: "string", .. })
        ));
    }

    #[test]
    fn long1_two_complement() {
        assert_eq!(decode(b"\x80\x02\x8a\x00."), Ok(PickleValue::Int(0)));
        assert_eq!(decode(b"\x80\x02\x8a\x01\xff."), Ok(PickleValue::Int(-1)));
        assert_eq!(decode(b"\x80\x02\x8a\x02\x00\x80."), Ok(PickleValue::Int(-32768)));
        assert_eq!(decode(b"\x80\x02\x8a\x03\x00\x80\x00."), Ok(PickleValue::Int(32768)));
        // 2**64
        assert_eq!(
            decode(b"\x80\x02\x8a\x09\x00\x00\x00\x00\x00\x00\x00\x00\x01."),
            Ok(PickleValue::BigInt(1 << 64))
        );
    }

    #[test]
    fn long1_wider_than_i128_is_rejected() {
        let mut data = vec![0x80, 0x02, 0x8a, 17];
        data.extend_from_slice(&[0u8; 16]);
        data.push(0x01);
        data.push(b'.');
        assert!(matches!(decode(&data), Err(PickleError::IntegerTooLarge(_))));

        // Redundant sign bytes are fine.
        let mut data = vec![0x80, 0x02, 0x8a, 17];
        data.extend_from_slice(&[0xff; 17]);
        data.push(b'.');
        assert_eq!(decode(&data), Ok(PickleValue::Int(-1)));
    }

    #[test]
    fn memo_sees_later_mutation() {
        // a = []; pickle.dumps([a, a], protocol=2) with a filled after BINPUT.
        let data = b"\x80\x02]q\x00(]q\x01K\x01ah\x01e.";
        assert_eq!(
            decode(data),
            Ok(PickleValue::List(vec![
                PickleValue::List(vec![PickleValue::Int(1)]),
                PickleValue::List(vec![PickleValue::Int(1)]),
            ]))
        );
    }

    #[test]
    fn self_containing_list_is_rejected() {
        // l = []; l.append(l)
        let data = b"\x80\x02]q\x00h\x00a.";
        assert_eq!(decode(data), Err(PickleError::CircularReference));
    }

    /// `n` nested empty lists, built innermost-last like `pickle.dumps`.
    fn nested_lists(n: usize) -> Vec<u8> {
        let mut data = b"\x80\x02".to_vec();
        data.extend(std::iter::repeat(op::EMPTY_LIST).take(n));
        data.extend(std::iter::repeat(op::APPEND).take(n - 1));
        data.push(op::STOP);
        data
    }

    #[test]
    fn nesting_limit_counts_the_root() {
        let mut value = decode(&nested_lists(MAX_DEPTH)).unwrap();
        let mut levels = 1;
        while let PickleValue::List(mut items) = value {
            match items.pop() {
                Some(inner) => {
                    levels += 1;
                    value = inner;
                }
                None => break,
            }
        }
        assert_eq!(levels, MAX_DEPTH);

        assert_eq!(
            decode(&nested_lists(MAX_DEPTH + 1)),
            Err(PickleError::NestingTooDeep(MAX_DEPTH))
        );
        assert_eq!(
            decode(&nested_lists(20 * MAX_DEPTH)),
            Err(PickleError::NestingTooDeep(MAX_DEPTH))
        );
    }

    #[test]
    fn dict_pairs_keep_key_then_value() {
        // {'a': [1, {'b': (2,)}], 'c': None}
        let data = b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01]q\x02(K\x01}q\x03\
X\x01\x00\x00\x00bq\x04K\x02\x85q\x05seX\x01\x00\x00\x00cq\x06Nu.";
        assert_eq!(
            decode(data).unwrap(),
            PickleValue::dict([
                (
                    "a",
                    PickleValue::List(vec![
                        PickleValue::Int(1),
                        PickleValue::dict([("b", PickleValue::Tuple(vec![PickleValue::Int(2)]))]),
                    ])
                ),
                ("c", PickleValue::None),
            ])
        );
    }

    #[test]
    fn structural_errors() {
        assert_eq!(decode(b""), Err(PickleError::MissingStop));
        assert_eq!(decode(b"N"), Err(PickleError::MissingStop));
        assert_eq!(decode(b"."), Err(PickleError::StackUnderflow(0)));
        assert_eq!(decode(b"e."), Err(PickleError::MarkNotFound(0)));
        assert_eq!(
            decode(b"h\x05."),
            Err(PickleError::MemoKeyNotFound { key: 5, offset: 0 })
        );
        assert_eq!(decode(b"\x80\x06N."), Err(PickleError::UnsupportedProtocol(6)));
        assert_eq!(
            decode(b"\xffN."),
            Err(PickleError::UnknownOpcode {
                opcode: 0xff,
                offset: 0
            })
        );
        assert!(matches!(decode(b"X\x05\x00\x00\x00ab."), Err(PickleError::Truncated(_))));
    }

    #[test]
    fn refuses_code_paths() {
        assert!(matches!(
            decode(b"P1\n."),
            Err(PickleError::UnsupportedOpcode { reason: "persistent ids", .. })
        ));
        assert!(matches!(
            decode(b"\x80\x05\x97."),
            Err(PickleError::UnsupportedOpcode { reason: "out-of-band buffers", .. })
        ));
        assert!(matches!(
            decode(b"\x80\x02\x82\x01."),
            Err(PickleError::UnsupportedOpcode { reason: "extension registry", .. })
        ));
    }

    #[test]
    fn unknown_callables_become_opaque_objects() {
        // os.system("echo hi") as protocol 0.
        let data = b"cos\nsystem\n(S'echo hi'\ntR.";
        assert_eq!(
            decode(data),
            Ok(PickleValue::Object {
                module: "os".to_string(),
                name: "system".to_string()
            })
        );
    }

    #[test]
    fn unescape_handles_octal_and_continuations() {
        assert_eq!(unescape_string(b"\\101\\0"), Some(vec![b'A', 0]));
        assert_eq!(unescape_string(b"a\\\nb"), Some(b"ab".to_vec()));
        assert_eq!(unescape_string(b"\\q"), Some(b"\\q".to_vec()));
        assert_eq!(unescape_string(b"\\"), None);
        assert_eq!(unescape_string(b"\\x4"), None);
    }

    #[test]
    fn encode_text_encodings() {
        assert_eq!(encode_text("\u{ff}", "latin1"), Some(Ok(vec![0xff])));
        assert_eq!(encode_text("\u{ff}", "Latin-1"), Some(Ok(vec![0xff])));
        assert_eq!(encode_text("\u{20ac}", "latin1"), None);
        assert_eq!(encode_text("\u{e9}", "utf-8"), Some(Ok(vec![0xc3, 0xa9])));
        assert!(matches!(
            encode_text("x", "rot13"),
            Some(Err(PickleError::UnsupportedEncoding(_)))
        ));
    }
}
