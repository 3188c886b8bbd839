//! A small PZ module writer for tests: builds the §bit-exact file layout
//! the loader consumes.

#![allow(dead_code)]

use pz_asm::{Opcode, MAGIC_DESC_LIBRARY, MAGIC_DESC_PROGRAM, MAGIC_LIBRARY, MAGIC_OBJECT,
    MAGIC_PROGRAM, PZ_FORMAT_VERSION};

/// Width file codes.
pub const W8: u8 = 0;
pub const W16: u8 = 1;
pub const W32: u8 = 2;
pub const W64: u8 = 3;
pub const FAST: u8 = 4;
pub const PTR: u8 = 5;

/// Closure environment id meaning "no environment".
pub const NO_ENV: u32 = u32::MAX;

fn push_str16(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// One data slot.
pub enum Slot {
    Normal1(u8),
    Normal4(u32),
    Normal8(u64),
    Fast(u32),
    Wptr(i32),
    DataRef(u32),
    ImportRef(u32),
    ClosureRef(u32),
}

impl Slot {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Slot::Normal1(v) => {
                out.push(0x01);
                out.push(*v);
            }
            Slot::Normal4(v) => {
                out.push(0x04);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Slot::Normal8(v) => {
                out.push(0x08);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Slot::Fast(v) => {
                out.push(0x14);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Slot::Wptr(v) => {
                out.push(0x24);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Slot::DataRef(id) => {
                out.push(0x34);
                out.extend_from_slice(&id.to_le_bytes());
            }
            Slot::ImportRef(id) => {
                out.push(0x44);
                out.extend_from_slice(&id.to_le_bytes());
            }
            Slot::ClosureRef(id) => {
                out.push(0x54);
                out.extend_from_slice(&id.to_le_bytes());
            }
        }
    }
}

/// An instruction immediate, in its file encoding.
pub enum Imm {
    None,
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// Any of the u32-encoded symbolic references.
    Ref(u32),
    /// A struct id and field number.
    Field(u32, u32),
}

/// Builds one proc record: name, blocks, items.
pub struct ProcBuilder {
    name: String,
    blocks: Vec<Vec<Vec<u8>>>,
}

impl ProcBuilder {
    pub fn new(name: &str) -> Self {
        ProcBuilder {
            name: name.to_string(),
            blocks: Vec::new(),
        }
    }

    /// Start a new block; instructions go to the most recent one.
    pub fn block(mut self) -> Self {
        self.blocks.push(Vec::new());
        self
    }

    fn item(&mut self, bytes: Vec<u8>) {
        if self.blocks.is_empty() {
            self.blocks.push(Vec::new());
        }
        self.blocks.last_mut().unwrap().push(bytes);
    }

    pub fn instr(mut self, op: Opcode, widths: &[u8], imm: Imm) -> Self {
        let mut bytes = vec![0x00, op as u8];
        bytes.extend_from_slice(widths);
        match imm {
            Imm::None => {}
            Imm::U8(v) => bytes.push(v),
            Imm::U16(v) => bytes.extend_from_slice(&v.to_le_bytes()),
            Imm::U32(v) | Imm::Ref(v) => bytes.extend_from_slice(&v.to_le_bytes()),
            Imm::U64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
            Imm::Field(s, f) => {
                bytes.extend_from_slice(&s.to_le_bytes());
                bytes.extend_from_slice(&f.to_le_bytes());
            }
        }
        self.item(bytes);
        self
    }

    pub fn context(mut self, data_id: u32, line: u32) -> Self {
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(&data_id.to_le_bytes());
        bytes.extend_from_slice(&line.to_le_bytes());
        self.item(bytes);
        self
    }

    pub fn context_short(mut self, line: u32) -> Self {
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(&line.to_le_bytes());
        self.item(bytes);
        self
    }

    pub fn context_nil(mut self) -> Self {
        self.item(vec![0x03]);
        self
    }

    fn encode(&self, out: &mut Vec<u8>) {
        push_str16(out, &self.name);
        out.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for block in &self.blocks {
            out.extend_from_slice(&(block.len() as u32).to_le_bytes());
            for item in block {
                out.extend_from_slice(item);
            }
        }
    }
}

/// Builds a whole module file.
pub struct ModuleBuilder {
    magic: u32,
    version: u16,
    options: Vec<(u16, Vec<u8>)>,
    names: Vec<String>,
    imports: Vec<(String, String)>,
    structs: Vec<Vec<u8>>,
    datas: Vec<Vec<u8>>,
    procs: Vec<ProcBuilder>,
    closures: Vec<(u32, u32)>,
    exports: Vec<(String, u32)>,
    trailing: Vec<u8>,
}

impl ModuleBuilder {
    fn with_magic(magic: u32) -> Self {
        ModuleBuilder {
            magic,
            version: PZ_FORMAT_VERSION,
            options: Vec::new(),
            names: Vec::new(),
            imports: Vec::new(),
            structs: Vec::new(),
            datas: Vec::new(),
            procs: Vec::new(),
            closures: Vec::new(),
            exports: Vec::new(),
            trailing: Vec::new(),
        }
    }

    pub fn program() -> Self {
        Self::with_magic(MAGIC_PROGRAM)
    }

    pub fn library() -> Self {
        Self::with_magic(MAGIC_LIBRARY)
    }

    pub fn object() -> Self {
        Self::with_magic(MAGIC_OBJECT)
    }

    pub fn raw_magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// The entry-closure option: `(signature, closure_id)`.
    pub fn entry(mut self, signature: u8, closure_id: u32) -> Self {
        let mut value = vec![signature];
        value.extend_from_slice(&closure_id.to_le_bytes());
        self.options.push((0, value));
        self
    }

    /// An arbitrary option record.
    pub fn option(mut self, opt_type: u16, value: &[u8]) -> Self {
        self.options.push((opt_type, value.to_vec()));
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.names.push(name.to_string());
        self
    }

    pub fn import(mut self, module: &str, symbol: &str) -> Self {
        self.imports.push((module.to_string(), symbol.to_string()));
        self
    }

    pub fn struct_(mut self, widths: &[u8]) -> Self {
        self.structs.push(widths.to_vec());
        self
    }

    pub fn data_array(mut self, width: u8, slots: &[Slot]) -> Self {
        let mut bytes = vec![0x00];
        bytes.extend_from_slice(&(slots.len() as u16).to_le_bytes());
        bytes.push(width);
        for slot in slots {
            slot.encode(&mut bytes);
        }
        self.datas.push(bytes);
        self
    }

    pub fn data_struct(mut self, struct_id: u32, slots: &[Slot]) -> Self {
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(&struct_id.to_le_bytes());
        for slot in slots {
            slot.encode(&mut bytes);
        }
        self.datas.push(bytes);
        self
    }

    pub fn data_string(mut self, s: &str) -> Self {
        let mut bytes = vec![0x02];
        bytes.extend_from_slice(&(s.len() as u16).to_le_bytes());
        bytes.push(W8);
        for byte in s.bytes() {
            Slot::Normal1(byte).encode(&mut bytes);
        }
        self.datas.push(bytes);
        self
    }

    pub fn proc(mut self, proc: ProcBuilder) -> Self {
        self.procs.push(proc);
        self
    }

    pub fn closure(mut self, proc_id: u32, data_id: u32) -> Self {
        self.closures.push((proc_id, data_id));
        self
    }

    pub fn export(mut self, symbol: &str, closure_id: u32) -> Self {
        self.exports.push((symbol.to_string(), closure_id));
        self
    }

    pub fn trailing_junk(mut self, bytes: &[u8]) -> Self {
        self.trailing.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(&self.magic.to_le_bytes());
        let desc = if self.magic == MAGIC_LIBRARY {
            MAGIC_DESC_LIBRARY
        } else {
            MAGIC_DESC_PROGRAM
        };
        push_str16(&mut out, desc);
        out.extend_from_slice(&self.version.to_le_bytes());

        out.extend_from_slice(&(self.options.len() as u16).to_le_bytes());
        for (opt_type, value) in &self.options {
            out.extend_from_slice(&opt_type.to_le_bytes());
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
            out.extend_from_slice(value);
        }

        out.extend_from_slice(&(self.names.len() as u32).to_le_bytes());
        for name in &self.names {
            push_str16(&mut out, name);
        }

        out.extend_from_slice(&(self.imports.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.structs.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.datas.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.procs.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.closures.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.exports.len() as u32).to_le_bytes());

        for (module, symbol) in &self.imports {
            push_str16(&mut out, module);
            push_str16(&mut out, symbol);
        }

        for widths in &self.structs {
            out.extend_from_slice(&(widths.len() as u32).to_le_bytes());
            out.extend_from_slice(widths);
        }

        for data in &self.datas {
            out.extend_from_slice(data);
        }

        for proc in &self.procs {
            proc.encode(&mut out);
        }

        for (proc_id, data_id) in &self.closures {
            out.extend_from_slice(&proc_id.to_le_bytes());
            out.extend_from_slice(&data_id.to_le_bytes());
        }

        for (symbol, closure_id) in &self.exports {
            push_str16(&mut out, symbol);
            out.extend_from_slice(&closure_id.to_le_bytes());
        }

        out.extend_from_slice(&self.trailing);
        out
    }
}

/// Write the module to a temporary file and return its handle.
pub fn write_module(bytes: &[u8]) -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().expect("creating a temp module");
    file.write_all(bytes).expect("writing the module");
    file.flush().expect("flushing the module");
    file
}
