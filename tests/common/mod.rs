#![allow(dead_code)]

use std::path::PathBuf;

use rsinject::bearing::{Bearing, UserConfig, MAPPING_SIZE};

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const EM_386: u16 = 3;
pub const EM_MIPS: u16 = 8;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;

const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_DYNSYM: u32 = 11;

/// Writes minimal ELF images containing only the sections symbol lookup reads.
#[derive(Clone)]
pub struct ElfBuilder {
    is_64: bool,
    big_endian: bool,
    e_type: u16,
    e_machine: u16,
    symtab: Option<Vec<Entry>>,
    dynsym: Option<Vec<Entry>>,
    with_strtab: bool,
}

#[derive(Clone)]
struct Entry {
    name: Vec<u8>,
    value: u64,
    shndx: u16,
}

struct Section {
    name: &'static str,
    sh_type: u32,
    data: Vec<u8>,
    entsize: u64,
}

impl ElfBuilder {
    pub fn elf64(e_type: u16, e_machine: u16) -> Self {
        Self {
            is_64: true,
            big_endian: false,
            e_type,
            e_machine,
            symtab: None,
            dynsym: None,
            with_strtab: true,
        }
    }

    pub fn elf32(e_type: u16, e_machine: u16) -> Self {
        Self {
            is_64: false,
            ..Self::elf64(e_type, e_machine)
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn symtab(mut self, symbols: &[(&str, u64)]) -> Self {
        self.symtab = Some(owned(symbols));
        self
    }

    pub fn dynsym(mut self, symbols: &[(&str, u64)]) -> Self {
        self.dynsym = Some(owned(symbols));
        self
    }

    /// Appends an undefined `.dynsym` entry (`st_shndx == SHN_UNDEF`), as an
    /// executable's import with a canonical PLT address looks.
    pub fn dynsym_import(mut self, name: &str, value: u64) -> Self {
        self.dynsym.get_or_insert_with(Vec::new).push(Entry {
            name: name.as_bytes().to_vec(),
            value,
            shndx: 0,
        });
        self
    }

    /// Appends a defined `.dynsym` entry whose name is arbitrary bytes.
    pub fn dynsym_raw(mut self, name: &[u8], value: u64) -> Self {
        self.dynsym.get_or_insert_with(Vec::new).push(Entry {
            name: name.to_vec(),
            value,
            shndx: 1,
        });
        self
    }

    pub fn without_strtab(mut self) -> Self {
        self.with_strtab = false;
        self
    }

    fn u16(&self, out: &mut Vec<u8>, value: u16) {
        out.extend_from_slice(&if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        });
    }

    fn u32(&self, out: &mut Vec<u8>, value: u32) {
        out.extend_from_slice(&if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        });
    }

    fn u64(&self, out: &mut Vec<u8>, value: u64) {
        out.extend_from_slice(&if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        });
    }

    fn word(&self, out: &mut Vec<u8>, value: u64) {
        if self.is_64 {
            self.u64(out, value);
        } else {
            self.u32(out, value as u32);
        }
    }

    fn symbol_section(&self, symbols: &[Entry]) -> (Vec<u8>, Vec<u8>) {
        let mut strings = vec![0u8];
        let mut entries = Vec::new();
        // Entry 0 is the reserved null symbol.
        entries.resize(if self.is_64 { 24 } else { 16 }, 0);

        for Entry { name, value, shndx } in symbols {
            let name_offset = strings.len() as u32;
            strings.extend_from_slice(name);
            strings.push(0);

            let info = (1u8 << 4) | 2; // STB_GLOBAL | STT_FUNC
            let shndx = *shndx;
            if self.is_64 {
                self.u32(&mut entries, name_offset);
                entries.push(info);
                entries.push(0);
                self.u16(&mut entries, shndx);
                self.u64(&mut entries, *value);
                self.u64(&mut entries, 16);
            } else {
                self.u32(&mut entries, name_offset);
                self.u32(&mut entries, *value as u32);
                self.u32(&mut entries, 16);
                entries.push(info);
                entries.push(0);
                self.u16(&mut entries, shndx);
            }
        }
        (entries, strings)
    }

    pub fn build(&self) -> Vec<u8> {
        let sym_entsize = if self.is_64 { 24 } else { 16 };
        let mut sections = Vec::new();

        if let Some(symbols) = &self.symtab {
            let (entries, strings) = self.symbol_section(symbols);
            sections.push(Section {
                name: ".symtab",
                sh_type: SHT_SYMTAB,
                data: entries,
                entsize: sym_entsize,
            });
            if self.with_strtab {
                sections.push(Section {
                    name: ".strtab",
                    sh_type: SHT_STRTAB,
                    data: strings,
                    entsize: 0,
                });
            }
        }
        if let Some(symbols) = &self.dynsym {
            let (entries, strings) = self.symbol_section(symbols);
            sections.push(Section {
                name: ".dynsym",
                sh_type: SHT_DYNSYM,
                data: entries,
                entsize: sym_entsize,
            });
            sections.push(Section {
                name: ".dynstr",
                sh_type: SHT_STRTAB,
                data: strings,
                entsize: 0,
            });
        }

        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for section in &sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        sections.push(Section {
            name: ".shstrtab",
            sh_type: SHT_STRTAB,
            data: shstrtab,
            entsize: 0,
        });
        name_offsets.push(shstrtab_name);

        let header_size = if self.is_64 { 64 } else { 52 };
        let shentsize: u16 = if self.is_64 { 64 } else { 40 };

        let mut body = Vec::new();
        let mut offsets = Vec::new();
        for section in &sections {
            while (header_size + body.len()) % 8 != 0 {
                body.push(0);
            }
            offsets.push((header_size + body.len()) as u64);
            body.extend_from_slice(&section.data);
        }
        while (header_size + body.len()) % 8 != 0 {
            body.push(0);
        }
        let shoff = (header_size + body.len()) as u64;
        let shnum = sections.len() as u16 + 1;
        let shstrndx = shnum - 1;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        out.push(if self.is_64 { 2 } else { 1 });
        out.push(if self.big_endian { 2 } else { 1 });
        out.push(1);
        out.resize(16, 0);
        self.u16(&mut out, self.e_type);
        self.u16(&mut out, self.e_machine);
        self.u32(&mut out, 1);
        self.word(&mut out, 0x1000); // e_entry
        self.word(&mut out, 0); // e_phoff
        self.word(&mut out, shoff);
        self.u32(&mut out, 0); // e_flags
        self.u16(&mut out, header_size as u16);
        self.u16(&mut out, 0); // e_phentsize
        self.u16(&mut out, 0); // e_phnum
        self.u16(&mut out, shentsize);
        self.u16(&mut out, shnum);
        self.u16(&mut out, shstrndx);
        assert_eq!(out.len(), header_size);

        out.extend_from_slice(&body);

        // Null section header.
        out.resize(out.len() + shentsize as usize, 0);
        for ((section, offset), name) in sections.iter().zip(&offsets).zip(&name_offsets) {
            let size = section.data.len() as u64;
            self.u32(&mut out, *name);
            self.u32(&mut out, section.sh_type);
            self.word(&mut out, 0); // sh_flags
            self.word(&mut out, 0); // sh_addr
            self.word(&mut out, *offset);
            self.word(&mut out, size);
            self.u32(&mut out, 0); // sh_link
            self.u32(&mut out, 0); // sh_info
            self.word(&mut out, 8); // sh_addralign
            self.word(&mut out, section.entsize);
        }
        out
    }

    pub fn write(&self, name: &str) -> PathBuf {
        write_file(name, &self.build())
    }
}

fn owned(symbols: &[(&str, u64)]) -> Vec<Entry> {
    symbols
        .iter()
        .map(|(name, value)| Entry {
            name: name.as_bytes().to_vec(),
            value: *value,
            shndx: 1,
        })
        .collect()
}

/// A per-process scratch file under the temp dir.
pub fn write_file(name: &str, bytes: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("rsinject-{}-{name}", std::process::id()));
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

/// A distinct SysV key per test so tests in one binary never collide.
pub fn test_key(tag: i32) -> rsinject::IpcKey {
    rsinject::IpcKey(((std::process::id() as i32) << 8) | (tag & 0xff))
}

/// The injector's half: creates the segment and semaphore, writes the record.
pub struct Staging {
    pub shm_id: libc::c_int,
    pub sem_id: libc::c_int,
}

impl Staging {
    pub fn new(key: rsinject::IpcKey, bearing: &Bearing) -> Self {
        unsafe {
            let shm_id = create_exclusive(|flags| libc::shmget(key.0, MAPPING_SIZE, flags), |id| {
                libc::shmctl(id, libc::IPC_RMID, core::ptr::null_mut());
            }, || libc::shmget(key.0, 0, 0));
            assert!(shm_id >= 0, "shmget: {}", std::io::Error::last_os_error());

            let address = libc::shmat(shm_id, core::ptr::null(), 0);
            assert_ne!(address as isize, -1, "shmat: {}", std::io::Error::last_os_error());
            core::ptr::copy_nonoverlapping(
                bearing.as_bytes().as_ptr(),
                address.cast::<u8>(),
                MAPPING_SIZE,
            );
            assert_eq!(libc::shmdt(address), 0);

            let sem_id = create_exclusive(|flags| libc::semget(key.0, 1, flags), |id| {
                libc::semctl(id, 0, libc::IPC_RMID);
            }, || libc::semget(key.0, 1, 0));
            assert!(sem_id >= 0, "semget: {}", std::io::Error::last_os_error());
            assert_eq!(libc::semctl(sem_id, 0, libc::SETVAL, 1 as libc::c_int), 0);

            Self { shm_id, sem_id }
        }
    }

    pub fn semaphore_value(&self) -> i32 {
        unsafe { libc::semctl(self.sem_id, 0, libc::GETVAL) }
    }

    pub fn attach_count(&self) -> u64 {
        attach_count(self.shm_id)
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        unsafe {
            libc::shmctl(self.shm_id, libc::IPC_RMID, core::ptr::null_mut());
            libc::semctl(self.sem_id, 0, libc::IPC_RMID);
        }
    }
}

/// Creates with `IPC_EXCL`, removing a stale object left by an earlier run.
unsafe fn create_exclusive(
    create: impl Fn(libc::c_int) -> libc::c_int,
    remove: impl Fn(libc::c_int),
    lookup: impl Fn() -> libc::c_int,
) -> libc::c_int {
    let flags = libc::IPC_CREAT | libc::IPC_EXCL | 0o600;
    let id = create(flags);
    if id >= 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::EEXIST) {
        return id;
    }
    let stale = lookup();
    if stale >= 0 {
        remove(stale);
    }
    create(flags)
}

pub fn attach_count(shm_id: libc::c_int) -> u64 {
    unsafe {
        let mut stat: libc::shmid_ds = core::mem::zeroed();
        assert_eq!(libc::shmctl(shm_id, libc::IPC_STAT, &mut stat), 0);
        stat.shm_nattch as u64
    }
}

/// A private segment attached in this process, standing in for the
/// scaffolding the injector leaves behind in the target.
pub struct Scaffolding {
    pub shm_id: libc::c_int,
    pub address: usize,
}

impl Scaffolding {
    pub fn attach() -> Self {
        unsafe {
            let shm_id = libc::shmget(libc::IPC_PRIVATE, 4096, libc::IPC_CREAT | 0o600);
            assert!(shm_id >= 0, "shmget: {}", std::io::Error::last_os_error());
            let address = libc::shmat(shm_id, core::ptr::null(), 0);
            assert_ne!(address as isize, -1);
            Self {
                shm_id,
                address: address as usize,
            }
        }
    }

    pub fn attach_count(&self) -> u64 {
        attach_count(self.shm_id)
    }
}

impl Drop for Scaffolding {
    fn drop(&mut self) {
        unsafe {
            if self.attach_count() > 0 {
                libc::shmdt(self.address as *const libc::c_void);
            }
            libc::shmctl(self.shm_id, libc::IPC_RMID, core::ptr::null_mut());
        }
    }
}

pub fn marker() -> [u8; 16] {
    *b"rsinject-marker!"
}

pub fn staged_bearing(mapped_mem: usize) -> Bearing {
    let mut bearing = Bearing::new(UserConfig::from_bytes(&marker()).unwrap(), mapped_mem);
    bearing.push_arg(b"libtest.so").unwrap();
    bearing.push_arg(b"hello").unwrap();
    bearing
}
