//! The read-only Bytecode View over a loaded AMX file image.

use crate::casetable::CaseTable;
use crate::error::{AmxResult, AmxRuntimeError};
use crate::header::{read_header, AmxHeader};
use crate::instructions::{Decoder, Instruction};
use crate::types::{Cell, FuncStub, NativeInfo, PubVar, TagInfo, UCell};

/// An AMX module: the raw file image plus its parsed header and
/// symbol tables. Owns no registers and runs nothing by itself -
/// see [`crate::registers::AmxRegisters`] for the part that moves.
pub struct AmxModule {
    image: Vec<u8>,
    header: AmxHeader,
    publics: Vec<(String, FuncStub)>,
    natives: Vec<(String, NativeInfo)>,
    pubvars: Vec<(String, PubVar)>,
    tags: Vec<(String, TagInfo)>,
}

impl AmxModule {
    /// Parse a module from its file image, validating the header
    /// invariants spelled out by the reference loader: `cod < dat <=
    /// hea <= stp`, and every symbol table offset falling inside
    /// `[publics, libraries)`.
    pub fn load(image: Vec<u8>) -> AmxResult<Self> {
        let header = read_header(&image)?;

        if !(header.cod < header.dat
            && header.dat <= header.hea
            && header.hea <= header.stp)
        {
            return Err(AmxRuntimeError::InvalidFormat);
        }

        let mut module = Self {
            image,
            header,
            publics: Vec::new(),
            natives: Vec::new(),
            pubvars: Vec::new(),
            tags: Vec::new(),
        };

        module.load_publics()?;
        module.load_natives()?;
        module.load_pubvars()?;
        module.load_tags()?;

        Ok(module)
    }

    /// Load a module from a file on disk. This is the one place the
    /// Bytecode View touches the filesystem; it exists for hosts (like
    /// `pawn-cli`) that need to go from a path to a module, not for the
    /// core, which only ever receives an already-loaded [`AmxModule`].
    pub fn from_file(path: impl AsRef<std::path::Path>) -> AmxResult<Self> {
        let image = std::fs::read(path).map_err(|_| AmxRuntimeError::InvalidFormat)?;
        Self::load(image)
    }

    pub fn header(&self) -> &AmxHeader {
        &self.header
    }

    /// Mutable access to the header, for a host's one-time setup steps
    /// (e.g. setting the `NTVREG` flag once every native resolves).
    pub fn header_mut(&mut self) -> &mut AmxHeader {
        &mut self.header
    }

    /// Start of the code section, as an offset into `image()`.
    pub fn code_base(&self) -> usize {
        self.header.cod as usize
    }

    /// Start of the data section, as an offset into `image()`.
    pub fn data_base(&self) -> usize {
        self.header.dat as usize
    }

    /// The code section bytes: `[cod, dat)`.
    pub fn code(&self) -> &[u8] {
        &self.image[self.code_base()..self.data_base()]
    }

    /// The initial data section bytes: `[dat, hea)`. Heap and stack
    /// space above `hea` is not part of the file image; a caller
    /// allocates it separately (see `pawn-cli`'s module loader).
    pub fn initial_data(&self) -> &[u8] {
        &self.image[self.data_base()..self.header.hea as usize]
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn num_publics(&self) -> usize {
        self.publics.len()
    }

    pub fn num_natives(&self) -> usize {
        self.natives.len()
    }

    pub fn public_address(&self, index: usize) -> Option<UCell> {
        self.publics.get(index).map(|(_, f)| f.address)
    }

    pub fn public_name(&self, index: usize) -> Option<&str> {
        self.publics.get(index).map(|(n, _)| n.as_str())
    }

    pub fn native_name(&self, index: usize) -> Option<&str> {
        self.natives.get(index).map(|(n, _)| n.as_str())
    }

    pub fn find_public(&self, name: &str) -> Option<&FuncStub> {
        self.publics.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn find_native(&self, name: &str) -> Option<&NativeInfo> {
        self.natives.iter().find(|(n, _)| n == name).map(|(_, n)| n)
    }

    pub fn find_pubvar(&self, name: &str) -> Option<&PubVar> {
        self.pubvars.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn find_tag(&self, name: &str) -> Option<&TagInfo> {
        self.tags.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn publics(&self) -> impl Iterator<Item = (&str, &FuncStub)> {
        self.publics.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn natives(&self) -> impl Iterator<Item = (&str, &NativeInfo)> {
        self.natives.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Decode every instruction in the code section in one pass.
    pub fn decode_all(&self) -> AmxResult<Vec<Instruction>> {
        Decoder::new(self.code()).decode_all()
    }

    /// Decode a single instruction starting at a code-relative address.
    pub fn decode_at(&self, address: usize) -> AmxResult<Option<Instruction>> {
        Decoder::at(self.code(), address).decode_next()
    }

    /// Mutable view of the code section, for a host's one-time
    /// relocation passes - e.g. resolving `SYSREQ.D` native-index
    /// operands to host function pointers before handing the module to
    /// `pawn-jit` or an interpreter, mirroring the reference loader's
    /// `amx_Register`/reloc step.
    pub fn code_mut(&mut self) -> &mut [u8] {
        let start = self.code_base();
        let end = self.data_base();
        &mut self.image[start..end]
    }

    /// Read the `CASETBL` payload immediately following a `switch`'s
    /// operand address (itself an offset from that instruction's own
    /// address, per the reference compiler's `OP_SWITCH` handling).
    pub fn case_table_at(&self, address: usize) -> AmxResult<CaseTable> {
        CaseTable::read(self.code(), address)
    }

    fn load_publics(&mut self) -> AmxResult<()> {
        if self.header.publics == 0 {
            return Ok(());
        }
        let count = self.header.num_entries(self.header.publics, self.header.natives);
        for i in 0..count {
            let entry = self.header.get_entry(&self.image, self.header.publics, i);
            let address = UCell::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            let name = self.header.get_entry_name(&self.image, entry).to_string();
            self.publics.push((
                name.clone(),
                FuncStub {
                    address,
                    name_offset: 0,
                    name_len: name.len(),
                },
            ));
        }
        Ok(())
    }

    fn load_natives(&mut self) -> AmxResult<()> {
        if self.header.natives == 0 {
            return Ok(());
        }
        let count = self.header.num_entries(self.header.natives, self.header.libraries);
        for i in 0..count {
            let entry = self.header.get_entry(&self.image, self.header.natives, i);
            let name = self.header.get_entry_name(&self.image, entry).to_string();
            self.natives.push((
                name.clone(),
                NativeInfo {
                    address: 0,
                    name_offset: 0,
                    name_len: name.len(),
                },
            ));
        }
        Ok(())
    }

    fn load_pubvars(&mut self) -> AmxResult<()> {
        if self.header.pubvars == 0 {
            return Ok(());
        }
        let count = self.header.num_entries(self.header.pubvars, self.header.tags);
        for i in 0..count {
            let entry = self.header.get_entry(&self.image, self.header.pubvars, i);
            let address = UCell::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            let name = self.header.get_entry_name(&self.image, entry).to_string();
            self.pubvars.push((
                name.clone(),
                PubVar {
                    address,
                    name_offset: 0,
                    name_len: name.len(),
                },
            ));
        }
        Ok(())
    }

    fn load_tags(&mut self) -> AmxResult<()> {
        if self.header.tags == 0 {
            return Ok(());
        }
        let count = self.header.num_entries(self.header.tags, self.header.nametable);
        for i in 0..count {
            let entry = self.header.get_entry(&self.image, self.header.tags, i);
            let tag_id = Cell::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            let name = self.header.get_entry_name(&self.image, entry).to_string();
            self.tags.push((
                name.clone(),
                TagInfo {
                    tag_id,
                    name_offset: 0,
                    name_len: name.len(),
                },
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::write_header;

    fn minimal_image() -> Vec<u8> {
        let header_size = write_header(&AmxHeader::new()).len() as i32;
        let mut header = AmxHeader::new();
        header.cod = header_size;
        header.dat = header.cod + 8; // two opcode cells of code
        header.hea = header.dat + 4;
        header.stp = header.hea + 1024;
        header.defsize = 8;
        header.publics = header.dat;
        header.natives = header.dat;
        header.libraries = header.dat;
        header.pubvars = header.dat;
        header.tags = header.dat;
        header.nametable = header.dat;

        let mut bytes = write_header(&header);
        bytes.extend_from_slice(&0i32.to_le_bytes()); // nop
        bytes.extend_from_slice(&(crate::instructions::Opcode::Halt as i32).to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes()); // initial data cell
        bytes
    }

    #[test]
    fn rejects_header_with_out_of_order_sections() {
        let mut header = AmxHeader::new();
        header.cod = 100;
        header.dat = 50; // dat before cod: invalid
        header.hea = 50;
        header.stp = 200;
        let bytes = write_header(&header);
        assert!(AmxModule::load(bytes).is_err());
    }

    #[test]
    fn loads_minimal_module_with_empty_tables() {
        let module = AmxModule::load(minimal_image()).unwrap();
        assert_eq!(module.num_publics(), 0);
        assert_eq!(module.num_natives(), 0);
        assert_eq!(module.code().len(), 8);
    }

    #[test]
    fn decodes_code_section() {
        let module = AmxModule::load(minimal_image()).unwrap();
        let instrs = module.decode_all().unwrap();
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].opcode, crate::instructions::Opcode::Nop);
        assert_eq!(instrs[1].opcode, crate::instructions::Opcode::Halt);
    }
}
