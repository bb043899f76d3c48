//! Module loading: magic dispatch, the legacy directory reader, and the
//! extended chunk reader.
//!
//! [`ModuleLoader`] owns the load pipeline. It pulls raw bytes from a
//! host [`ModuleSource`], fills in the [`Module`] slot a [`ModuleSet`]
//! handed out, and runs the [`Tracer`] so the cached module holds only
//! translated code. A failed load leaves no trace in the cache: the slot
//! is reset and the identity forgotten, so a later request retries.

use core_types::{LoadError, ModuleName, StringIdx, Word};
use memory_manager::StringTable;

use crate::escape::{self, scan_string};
use crate::module::{
    Function, InitTag, Module, ModuleSet, Script, WordInit, SCRIPT_FLAG_CLIENT, SCRIPT_FLAG_NET,
};
use crate::tables::SourceTables;
use crate::tracer::Tracer;

use log::{debug, info};

/// Magic for the legacy encoding: a script directory, no chunks.
pub const MAGIC_LEGACY: [u8; 4] = *b"KAR\0";
/// Magic for the extended chunked encoding.
pub const MAGIC_EXTENDED: [u8; 4] = *b"KARX";
/// Magic for the extended encoding with compressed instruction operands.
pub const MAGIC_PACKED: [u8; 4] = *b"KARx";

/// Local registers given to a script that does not declare a count.
pub const DEFAULT_SCRIPT_REGS: Word = 20;

/// Host hook that maps module identities to raw bytecode.
pub trait ModuleSource {
    /// Produces the bytes for a module. Called once per identity; the
    /// translated module is cached afterwards.
    fn fetch(&mut self, name: &ModuleName) -> Result<Vec<u8>, LoadError>;

    /// Maps a name string from an import table to a module identity.
    fn resolve(&mut self, raw: &[u8]) -> ModuleName {
        ModuleName::from_str(String::from_utf8_lossy(raw).into_owned())
    }
}

fn le2(data: &[u8], at: usize) -> Result<Word, LoadError> {
    let b = data.get(at..at + 2).ok_or(LoadError::UnexpectedEnd)?;
    Ok(Word::from(u16::from_le_bytes([b[0], b[1]])))
}

fn le4(data: &[u8], at: usize) -> Result<Word, LoadError> {
    let b = data.get(at..at + 4).ok_or(LoadError::UnexpectedEnd)?;
    Ok(Word::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Iterator over the chunks of an extended table region.
struct Chunks<'a> {
    data: &'a [u8],
    iter: usize,
}

fn chunks(data: &[u8]) -> Chunks<'_> {
    Chunks { data, iter: 0 }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Result<([u8; 4], &'a [u8]), LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.iter >= self.data.len() {
            return None;
        }
        if self.data.len() - self.iter < 8 {
            self.iter = self.data.len();
            return Some(Err(LoadError::UnexpectedEnd));
        }

        let tag: [u8; 4] = self.data[self.iter..self.iter + 4].try_into().unwrap();
        let size = match le4(self.data, self.iter + 4) {
            Ok(size) => size as usize,
            Err(err) => return Some(Err(err)),
        };
        self.iter += 8;

        if self.data.len() - self.iter < size {
            self.iter = self.data.len();
            return Some(Err(LoadError::BadChunk(tag)));
        }
        let payload = &self.data[self.iter..self.iter + size];
        self.iter += size;
        Some(Ok((tag, payload)))
    }
}

/// Finds the first chunk with `tag`, validating headers along the way.
fn find_chunk<'d>(region: &'d [u8], tag: &[u8; 4]) -> Result<Option<&'d [u8]>, LoadError> {
    for chunk in chunks(region) {
        let (t, payload) = chunk?;
        if &t == tag {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}

/// The module load pipeline.
///
/// Borrows the shared string table for literal interning, the source
/// tables for translation, and the host's byte source. One loader can
/// serve any number of [`ModuleSet`]s.
pub struct ModuleLoader<'a> {
    strings: &'a mut StringTable,
    tables: &'a SourceTables,
    source: &'a mut dyn ModuleSource,

    /// Local register allocation for scripts without a vector chunk.
    pub default_script_regs: Word,

    // Identities currently mid-load, so import cycles terminate.
    loading: Vec<ModuleName>,
}

impl<'a> ModuleLoader<'a> {
    /// Creates a loader over the shared tables and a byte source.
    pub fn new(
        strings: &'a mut StringTable,
        tables: &'a SourceTables,
        source: &'a mut dyn ModuleSource,
    ) -> Self {
        Self {
            strings,
            tables,
            source,
            default_script_regs: DEFAULT_SCRIPT_REGS,
            loading: Vec::new(),
        }
    }

    /// Returns the handle for `name`, loading and translating the module
    /// on first request.
    ///
    /// A module already mid-load resolves to its handle immediately, so
    /// mutually importing modules link against each other's partial
    /// function tables the way their import order dictates.
    pub fn get_or_load(
        &mut self,
        set: &mut ModuleSet,
        name: &ModuleName,
    ) -> Result<Word, LoadError> {
        let handle = set.add_module(name);
        if set.module(handle).loaded || self.loading.contains(name) {
            return Ok(handle);
        }

        info!("loading module {:?} ({})", name.name, name.number);
        let data = self.source.fetch(name)?;

        self.loading.push(name.clone());
        let mut module = set.take_module(handle);
        module.name = name.clone();
        let result = self.read_bytecode(&mut module, set, handle, &data);
        self.loading.pop();

        match result {
            Ok(()) => {
                module.loaded = true;
                debug!(
                    "module {:?}: {} scripts, {} functions, {} strings, {} code words",
                    module.name.name,
                    module.scripts.len(),
                    module.functions.len(),
                    module.strings.len(),
                    module.codes.len()
                );
                set.put_module(handle, module);
                Ok(handle)
            }
            Err(err) => {
                set.forget_module(name);
                Err(err)
            }
        }
    }

    fn read_bytecode(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        handle: Word,
        data: &[u8],
    ) -> Result<(), LoadError> {
        let magic: [u8; 4] = data
            .get(0..4)
            .ok_or(LoadError::UnexpectedEnd)?
            .try_into()
            .unwrap();
        match magic {
            MAGIC_LEGACY => self.read_legacy(module, set, handle, data),
            MAGIC_EXTENDED => self.read_extended(module, set, handle, data, false, 4),
            MAGIC_PACKED => self.read_extended(module, set, handle, data, true, 4),
            other => Err(LoadError::BadMagic(other)),
        }
    }

    /// Reads a legacy module: a header offset to a script directory
    /// followed by a string directory, with uncompressed code in between.
    fn read_legacy(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        handle: Word,
        data: &[u8],
    ) -> Result<(), LoadError> {
        let dir_ofs = le4(data, 4)? as usize;
        if dir_ofs > data.len() {
            return Err(LoadError::BadHeader);
        }

        // An extended module can hide behind a legacy header for tools
        // that only understand the old directory. The real magic sits
        // just before the directory offset.
        if dir_ofs >= 8 {
            match data.get(dir_ofs - 4..dir_ofs) {
                Some(m) if m == MAGIC_EXTENDED => {
                    return self.read_extended(module, set, handle, data, false, dir_ofs - 8);
                }
                Some(m) if m == MAGIC_PACKED => {
                    return self.read_extended(module, set, handle, data, true, dir_ofs - 8);
                }
                _ => {}
            }
        }

        module.is_legacy = true;
        module.clamp_call_spec = true;

        let mut iter = dir_ofs;
        let script_count = le4(data, iter)? as usize;
        iter += 4;
        module.scripts.reserve(script_count);
        for _ in 0..script_count {
            let name = le4(data, iter)?;
            let code_idx = le4(data, iter + 4)?;
            let arg_count = le4(data, iter + 8)?;
            iter += 12;

            let (script_type, name_int) = (self.tables.legacy_script_type)(name);
            module.scripts.push(Script {
                name_int,
                code_idx,
                arg_count,
                script_type,
                loc_reg_count: self.default_script_regs,
                ..Script::default()
            });
        }

        let string_count = le4(data, iter)? as usize;
        iter += 4;
        module.strings.reserve(string_count);
        for i in 0..string_count {
            let ofs = le4(data, iter + i * 4)? as usize;
            let (idx, _) = self.read_string(data, ofs)?;
            module.strings.push(idx);
        }

        self.read_code(module, set, handle, data, false)
    }

    /// Reads an extended module: a chunk table, processed in dependency
    /// order, then code translation over the whole buffer.
    ///
    /// `offset` is 4 for a native extended module. Any other value marks
    /// a module found behind a legacy header, which narrows the chunk
    /// region and switches to the compact script entry layout.
    fn read_extended(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        handle: Word,
        data: &[u8],
        compressed: bool,
        offset: usize,
    ) -> Result<(), LoadError> {
        let table = le4(data, offset)? as usize;
        let fake = offset != 4;
        let region = if !fake || table > offset {
            data.get(table..).ok_or(LoadError::BadHeader)?
        } else {
            data.get(table..offset).ok_or(LoadError::BadHeader)?
        };

        if let Some(payload) = find_chunk(region, b"MEXP")? {
            module.reg_names = self
                .chunk_str_tab(payload, false)?
                .into_iter()
                .map(Some)
                .collect();
        }
        self.read_arrays(module, region)?;
        self.read_array_inits(module, region)?;
        if let Some(payload) = find_chunk(region, b"FNAM")? {
            module.func_names = self
                .chunk_str_tab(payload, false)?
                .into_iter()
                .map(Some)
                .collect();
        }
        self.read_functions(module, set, handle, region)?;
        self.read_function_arrays(module, set, region)?;
        if let Some(payload) = find_chunk(region, b"JUMP")? {
            if payload.len() % 4 != 0 {
                return Err(LoadError::BadChunk(*b"JUMP"));
            }
            for at in (0..payload.len()).step_by(4) {
                module.jumps.push(le4(payload, at)?);
            }
        }
        if let Some(payload) = find_chunk(region, b"MINI")? {
            self.read_reg_inits(module, payload)?;
        }
        if let Some(payload) = find_chunk(region, b"SNAM")? {
            module.script_names = self.chunk_str_tab(payload, false)?;
        }
        self.read_scripts(module, region, fake)?;
        self.read_script_arrays(module, region)?;
        self.read_script_flags(module, region)?;
        self.read_script_vectors(module, region)?;
        self.read_strings(module, region)?;
        self.read_imports(module, set, handle, region)?;
        self.resolve_function_imports(module, set, handle);
        self.read_array_imports(module, region)?;
        self.read_reg_imports(module, region)?;
        self.read_array_tags(module, region)?;
        if let Some(payload) = find_chunk(region, b"MSTR")? {
            if payload.len() % 4 != 0 {
                return Err(LoadError::BadChunk(*b"MSTR"));
            }
            for at in (0..payload.len()).step_by(4) {
                let idx = le4(payload, at)? as usize;
                if let Some(init) = module.reg_inits.get_mut(idx) {
                    init.tag = InitTag::String;
                }
            }
        }
        for init in &mut module.arr_inits {
            init.finish();
        }

        module.clamp_call_spec = fake;
        self.read_code(module, set, handle, data, compressed)
    }

    /// ARAY: module array declarations. Declared names move out of the
    /// register export table.
    fn read_arrays(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        let Some(payload) = find_chunk(region, b"ARAY")? else {
            return Ok(());
        };
        if payload.len() % 8 != 0 {
            return Err(LoadError::BadChunk(*b"ARAY"));
        }

        let mut arr_count = 0usize;
        for at in (0..payload.len()).step_by(8) {
            arr_count = arr_count.max(le4(payload, at)? as usize + 1);
        }
        module.arr_sizes.resize(arr_count, 0);
        module.arr_inits.resize_with(arr_count, Default::default);
        module.arr_names.resize(arr_count, None);

        for at in (0..payload.len()).step_by(8) {
            let idx = le4(payload, at)? as usize;
            module.arr_sizes[idx] = le4(payload, at + 4)?;
            if let Some(name) = module.reg_names.get_mut(idx) {
                module.arr_names[idx] = name.take();
            }
        }
        Ok(())
    }

    /// AINI: array cell initializers, dense from a starting cell. Every
    /// instance applies; entries for undeclared arrays are dropped.
    fn read_array_inits(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"AINI" {
                continue;
            }
            if payload.len() < 4 || payload.len() % 4 != 0 {
                return Err(LoadError::BadChunk(*b"AINI"));
            }
            let idx = le4(payload, 0)? as usize;
            let Some(init) = module.arr_inits.get_mut(idx) else {
                continue;
            };
            for (cell, at) in (4..payload.len()).step_by(4).enumerate() {
                init.set(cell as Word, WordInit { val: le4(payload, at)?, tag: InitTag::Integer });
            }
        }
        Ok(())
    }

    /// FUNC: function declarations. A zero entry index marks an import
    /// slot resolved after the import table is read.
    fn read_functions(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        handle: Word,
        region: &[u8],
    ) -> Result<(), LoadError> {
        let Some(payload) = find_chunk(region, b"FUNC")? else {
            return Ok(());
        };
        if payload.len() % 8 != 0 {
            return Err(LoadError::BadChunk(*b"FUNC"));
        }

        let count = payload.len() / 8;
        module.functions = vec![0; count];
        if module.func_names.len() < count {
            module.func_names.resize(count, None);
        }

        for i in 0..count {
            let at = i * 8;
            let arg_count = Word::from(payload[at]);
            let loc_reg_count = Word::from(payload[at + 1]);
            let flags = le2(payload, at + 2)?;
            let code_idx = le4(payload, at + 4)?;
            if code_idx == 0 {
                continue;
            }

            let name_bytes = module.func_names[i].map(|idx| self.strings.get(idx).to_vec());
            let func_handle = set.get_function(&module.name, name_bytes.as_deref());
            set.set_function(
                func_handle,
                Function {
                    module: handle,
                    code_idx,
                    arg_count,
                    loc_reg_count,
                    loc_arr_count: 0,
                    has_return: flags & 1 != 0,
                },
            );
            module.functions[i] = func_handle;
        }
        Ok(())
    }

    /// FARY: local array counts for own-module functions.
    fn read_function_arrays(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        region: &[u8],
    ) -> Result<(), LoadError> {
        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"FARY" {
                continue;
            }
            if payload.len() < 2 {
                return Err(LoadError::BadChunk(*b"FARY"));
            }
            let idx = le2(payload, 0)? as usize;
            let Some(&func_handle) = module.functions.get(idx) else {
                continue;
            };
            if let Some(func) = set.function_mut(func_handle) {
                func.loc_arr_count = ((payload.len() - 2) / 4) as Word;
            }
        }
        Ok(())
    }

    /// MINI: module register initializers, dense from a starting index.
    fn read_reg_inits(&mut self, module: &mut Module, payload: &[u8]) -> Result<(), LoadError> {
        if payload.len() < 4 || payload.len() % 4 != 0 {
            return Err(LoadError::BadChunk(*b"MINI"));
        }
        let idx = le4(payload, 0)? as usize;
        let count = payload.len() / 4 - 1;
        if module.reg_inits.len() < idx + count {
            module.reg_inits.resize(idx + count, WordInit::default());
        }
        for k in 0..count {
            module.reg_inits[idx + k] =
                WordInit { val: le4(payload, 4 + k * 4)?, tag: InitTag::Integer };
        }
        Ok(())
    }

    /// SPTR: script entry points. The compact 8-byte layout is only used
    /// behind a legacy header.
    fn read_scripts(
        &mut self,
        module: &mut Module,
        region: &[u8],
        fake: bool,
    ) -> Result<(), LoadError> {
        let Some(payload) = find_chunk(region, b"SPTR")? else {
            return Ok(());
        };
        let entry_size = if fake { 8 } else { 12 };
        if payload.len() % entry_size != 0 {
            return Err(LoadError::BadChunk(*b"SPTR"));
        }

        for at in (0..payload.len()).step_by(entry_size) {
            let (name16, script_type, arg_count, code_idx) = if fake {
                (
                    le2(payload, at)?,
                    Word::from(payload[at + 2]),
                    Word::from(payload[at + 3]),
                    le4(payload, at + 4)?,
                )
            } else {
                (
                    le2(payload, at)?,
                    le2(payload, at + 2)?,
                    le4(payload, at + 8)?,
                    le4(payload, at + 4)?,
                )
            };

            let name_int = sign_extend_16(name16);
            let name_str = if name_int & 0x8000_0000 != 0 {
                module.script_names.get(!name_int as usize).copied()
            } else {
                None
            };
            module.scripts.push(Script {
                name_int,
                name_str,
                code_idx,
                arg_count,
                script_type,
                loc_reg_count: self.default_script_regs,
                ..Script::default()
            });
        }
        Ok(())
    }

    /// SARY: local array counts for scripts, matched by name word.
    fn read_script_arrays(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"SARY" {
                continue;
            }
            if payload.len() < 2 {
                return Err(LoadError::BadChunk(*b"SARY"));
            }
            let target = sign_extend_16(le2(payload, 0)?);
            let count = ((payload.len() - 2) / 4) as Word;
            for script in &mut module.scripts {
                if script.name_int == target {
                    script.loc_arr_count = count;
                }
            }
        }
        Ok(())
    }

    /// SFLG: per-script flag words.
    fn read_script_flags(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"SFLG" {
                continue;
            }
            if payload.len() % 4 != 0 {
                return Err(LoadError::BadChunk(*b"SFLG"));
            }
            for at in (0..payload.len()).step_by(4) {
                let target = sign_extend_16(le2(payload, at)?);
                let flags = le2(payload, at + 2)?;
                for script in &mut module.scripts {
                    if script.name_int != target {
                        continue;
                    }
                    if flags & 1 != 0 {
                        script.flags |= SCRIPT_FLAG_NET;
                    }
                    if flags & 2 != 0 {
                        script.flags |= SCRIPT_FLAG_CLIENT;
                    }
                }
            }
        }
        Ok(())
    }

    /// SVCT: per-script local register counts.
    fn read_script_vectors(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"SVCT" {
                continue;
            }
            if payload.len() % 4 != 0 {
                return Err(LoadError::BadChunk(*b"SVCT"));
            }
            for at in (0..payload.len()).step_by(4) {
                let target = sign_extend_16(le2(payload, at)?);
                let reg_count = le2(payload, at + 2)?;
                for script in &mut module.scripts {
                    if script.name_int == target {
                        script.loc_reg_count = reg_count;
                    }
                }
            }
        }
        Ok(())
    }

    /// STRE or STRL: the string literal table, encrypted or plain. An
    /// encrypted table wins when both are present.
    fn read_strings(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        if let Some(payload) = find_chunk(region, b"STRE")? {
            if payload.len() < 12 {
                return Err(LoadError::BadChunk(*b"STRE"));
            }
            let count = le4(payload, 4)? as usize;
            module.strings.reserve(count);
            for i in 0..count {
                let ofs = le4(payload, 12 + i * 4)? as usize;
                let plain = escape::decrypt_string(payload, ofs)?;
                let (idx, _) = self.read_string(&plain, 0)?;
                module.strings.push(idx);
            }
            return Ok(());
        }
        if let Some(payload) = find_chunk(region, b"STRL")? {
            module.strings = self.chunk_str_tab(payload, true)?;
        }
        Ok(())
    }

    /// LOAD: the import table. Each named module loads recursively; a
    /// module naming itself links against its own exports.
    fn read_imports(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        handle: Word,
        region: &[u8],
    ) -> Result<(), LoadError> {
        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"LOAD" {
                continue;
            }
            let mut iter = 0;
            while iter < payload.len() {
                let scan = scan_string(payload, iter)?;
                let bytes = escape::parse_string(payload, scan);
                iter = scan.end + 1;
                if bytes.is_empty() {
                    continue;
                }
                let imp_name = self.source.resolve(&bytes);
                let imp_handle = if imp_name == module.name {
                    handle
                } else {
                    self.get_or_load(set, &imp_name)?
                };
                module.imports.push(imp_handle);
            }
        }
        Ok(())
    }

    /// Fills unresolved function slots by searching the imports, in
    /// table order, for a defined function of the same name.
    fn resolve_function_imports(&mut self, module: &mut Module, set: &ModuleSet, handle: Word) {
        let imports = module.imports.clone();
        for i in 0..module.functions.len() {
            if module.functions[i] != 0 {
                continue;
            }
            let Some(name_idx) = module.func_names.get(i).copied().flatten() else {
                continue;
            };
            let mut resolved = 0;
            for &imp in &imports {
                let found = if imp == handle {
                    module.find_function(name_idx)
                } else {
                    set.module(imp).find_function(name_idx)
                };
                if let Some(func_handle) = found {
                    resolved = func_handle;
                    break;
                }
            }
            module.functions[i] = resolved;
        }
    }

    /// AIMP: imported array names. The leading count word is redundant
    /// with the entry stream and skipped.
    fn read_array_imports(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        let Some(payload) = find_chunk(region, b"AIMP")? else {
            return Ok(());
        };
        if payload.len() < 4 {
            return Err(LoadError::BadChunk(*b"AIMP"));
        }

        let mut arr_count = module.arr_imports.len();
        let mut iter = 4;
        while iter < payload.len() {
            let idx = le4(payload, iter)? as usize;
            let scan = scan_string(payload, iter + 8)?;
            arr_count = arr_count.max(idx + 1);
            iter = scan.end + 1;
        }
        module.arr_imports.resize(arr_count, None);

        let mut iter = 4;
        while iter < payload.len() {
            let idx = le4(payload, iter)? as usize;
            let (name, end) = self.read_string(payload, iter + 8)?;
            module.arr_imports[idx] = Some(name);
            iter = end + 1;
        }
        Ok(())
    }

    /// MIMP: imported register names.
    fn read_reg_imports(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        let Some(payload) = find_chunk(region, b"MIMP")? else {
            return Ok(());
        };
        let mut iter = 0;
        while iter < payload.len() {
            let idx = le4(payload, iter)? as usize;
            let (name, end) = self.read_string(payload, iter + 4)?;
            iter = end + 1;
            if module.reg_imports.len() <= idx {
                module.reg_imports.resize(idx + 1, None);
            }
            module.reg_imports[idx] = Some(name);
        }
        Ok(())
    }

    /// ASTR and ATAG: initializer tags for array cells. ASTR tags whole
    /// arrays as strings; ATAG tags individual cells.
    fn read_array_tags(&mut self, module: &mut Module, region: &[u8]) -> Result<(), LoadError> {
        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"ASTR" {
                continue;
            }
            if payload.len() % 4 != 0 {
                return Err(LoadError::BadChunk(*b"ASTR"));
            }
            for at in (0..payload.len()).step_by(4) {
                let idx = le4(payload, at)? as usize;
                let Some(size) = module.arr_sizes.get(idx).copied() else {
                    continue;
                };
                let init = &mut module.arr_inits[idx];
                for cell in 0..size {
                    init.set_tag(cell, InitTag::String);
                }
            }
        }

        for chunk in chunks(region) {
            let (tag, payload) = chunk?;
            if &tag != b"ATAG" {
                continue;
            }
            // Only tag list version zero is defined.
            if payload.len() < 5 || payload[0] != 0 {
                continue;
            }
            let idx = le4(payload, 1)? as usize;
            let Some(init) = module.arr_inits.get_mut(idx) else {
                continue;
            };
            for (cell, &byte) in payload[5..].iter().enumerate() {
                match byte {
                    0 => init.set_tag(cell as Word, InitTag::Integer),
                    1 => init.set_tag(cell as Word, InitTag::String),
                    2 => init.set_tag(cell as Word, InitTag::Function),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Reads a chunk-local string table: a count, offsets, then literals,
    /// all relative to the chunk. The junk layout carries two padding
    /// words around the count.
    fn chunk_str_tab(&mut self, payload: &[u8], junk: bool) -> Result<Vec<StringIdx>, LoadError> {
        let (count, mut iter) = if junk {
            (le4(payload, 4)? as usize, 12)
        } else {
            (le4(payload, 0)? as usize, 4)
        };

        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            let ofs = le4(payload, iter)? as usize;
            iter += 4;
            let (idx, _) = self.read_string(payload, ofs)?;
            table.push(idx);
        }
        Ok(table)
    }

    /// Scans and interns one literal, returning its handle and the offset
    /// of its terminator. Escape-free literals intern without copying.
    fn read_string(&mut self, data: &[u8], offset: usize) -> Result<(StringIdx, usize), LoadError> {
        let scan = scan_string(data, offset)?;
        let idx = if scan.end - scan.begin == scan.len {
            self.strings.intern(&data[scan.begin..scan.end])
        } else {
            self.strings.intern(&escape::parse_string(data, scan))
        };
        Ok((idx, scan.end))
    }

    fn read_code(
        &mut self,
        module: &mut Module,
        set: &mut ModuleSet,
        handle: Word,
        data: &[u8],
        compressed: bool,
    ) -> Result<(), LoadError> {
        let mut tracer = Tracer::new(self.tables, data, compressed);
        tracer.trace(module, set, handle)?;
        tracer.translate(module, set, handle)
    }
}

fn sign_extend_16(word: Word) -> Word {
    if word & 0x8000 != 0 {
        word | 0xFFFF_0000
    } else {
        word
    }
}
