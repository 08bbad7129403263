//! ISO 9660 writer for config drive images.
//!
//! Config drives are read by path (`openstack/latest/meta_data.json`), so
//! the image needs nested directories and lowercase names. Names are kept
//! through Rock Ridge NM entries; the Level 1 identifiers only exist for
//! readers without Rock Ridge support.
//!
//! ```text
//! Sectors
//!   0 - 15   system area (zeros)
//!   16       primary volume descriptor
//!   17       volume descriptor set terminator
//!   18 / 19  path table, little / big endian
//!   20       SUSP continuation area (Rock Ridge ER entry)
//!   21 ..    one sector per directory, root first, breadth first
//!   ..       file data, each file on a sector boundary
//! ```
//!
//! References: ECMA-119, SUSP (IEEE P1281), RRIP (IEEE P1282).

use std::collections::BTreeSet;

use crate::error::{Error, Result};

const SECTOR_SIZE: usize = 2048;
const PVD_SECTOR: usize = 16;
const VDST_SECTOR: usize = 17;
const L_PATH_TABLE_SECTOR: usize = 18;
const M_PATH_TABLE_SECTOR: usize = 19;
const CE_SECTOR: usize = 20;
const FIRST_DIR_SECTOR: usize = 21;

/// Longest path component; keeps every directory record under 255 bytes.
const MAX_NAME_LEN: usize = 128;

/// A file to place in the image.
pub struct IsoFile<'a> {
    /// Slash separated path relative to the image root, e.g.
    /// `openstack/latest/user_data`. Parent directories are created.
    pub path: &'a str,
    pub data: &'a [u8],
}

struct Directory {
    /// Empty for the root.
    path: String,
    /// Index of the parent in breadth-first order; the root is its own.
    parent: usize,
    sector: usize,
}

/// Build an image labelled `volume_id` holding `files`.
///
/// Fails with `Validation` for a volume id longer than 32 bytes or not
/// ASCII, for malformed paths, and for directories that do not fit in a
/// single sector.
pub fn build_iso(volume_id: &str, files: &[IsoFile<'_>]) -> Result<Vec<u8>> {
    if volume_id.len() > 32 || !volume_id.is_ascii() {
        return Err(Error::Validation(format!(
            "invalid ISO volume id '{}'",
            volume_id
        )));
    }
    for file in files {
        validate_path(file.path)?;
    }

    let dirs = directories(files);
    let mut next_sector = FIRST_DIR_SECTOR + dirs.len();
    let mut extents = Vec::with_capacity(files.len());
    for file in files {
        extents.push(next_sector);
        next_sector += sectors_for(file.data.len());
    }
    let total_sectors = next_sector;

    let l_table = path_table(&dirs, Endian::Little);
    let m_table = path_table(&dirs, Endian::Big);
    if l_table.len() > SECTOR_SIZE {
        return Err(Error::Validation(
            "too many directories for an ISO path table".to_string(),
        ));
    }

    let mut iso = vec![0u8; total_sectors * SECTOR_SIZE];
    write_pvd(
        &mut iso,
        volume_id,
        total_sectors as u32,
        l_table.len() as u32,
        dirs[0].sector as u32,
    );
    write_vdst(&mut iso);
    write_at(&mut iso, L_PATH_TABLE_SECTOR, &l_table);
    write_at(&mut iso, M_PATH_TABLE_SECTOR, &m_table);

    let er = susp_er();
    write_at(&mut iso, CE_SECTOR, &er);

    for (index, dir) in dirs.iter().enumerate() {
        let extent = directory_extent(index, &dirs, files, &extents, er.len())?;
        write_at(&mut iso, dir.sector, &extent);
    }
    for (file, sector) in files.iter().zip(&extents) {
        write_at(&mut iso, *sector, file.data);
    }

    Ok(iso)
}

fn validate_path(path: &str) -> Result<()> {
    let valid = path.split('/').all(|part| {
        !part.is_empty() && part != "." && part != ".." && part.len() <= MAX_NAME_LEN
    });
    if !valid {
        return Err(Error::Validation(format!("invalid ISO file path '{}'", path)));
    }
    Ok(())
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Every directory implied by `files`, breadth first with siblings sorted
/// by identifier. Path tables must be ordered this way.
fn directories(files: &[IsoFile<'_>]) -> Vec<Directory> {
    let mut paths = BTreeSet::new();
    for file in files {
        let mut parent = parent_of(file.path);
        while !parent.is_empty() {
            paths.insert(parent.to_string());
            parent = parent_of(parent);
        }
    }

    let mut dirs = vec![Directory {
        path: String::new(),
        parent: 0,
        sector: FIRST_DIR_SECTOR,
    }];
    let mut index = 0;
    while index < dirs.len() {
        let mut children: Vec<&String> = paths
            .iter()
            .filter(|p| parent_of(p) == dirs[index].path)
            .collect();
        children.sort_by_key(|p| dir_identifier(name_of(p)));
        for child in children {
            let sector = FIRST_DIR_SECTOR + dirs.len();
            dirs.push(Directory {
                path: child.clone(),
                parent: index,
                sector,
            });
        }
        index += 1;
    }
    dirs
}

#[derive(Clone, Copy)]
enum Endian {
    Little,
    Big,
}

/// One entry per directory: identifier length, extended attribute length,
/// extent, 1-based parent number, identifier, padding to even length.
fn path_table(dirs: &[Directory], endian: Endian) -> Vec<u8> {
    let mut table = Vec::new();
    for dir in dirs {
        let id = if dir.path.is_empty() {
            vec![0u8]
        } else {
            dir_identifier(name_of(&dir.path)).into_bytes()
        };
        let extent = dir.sector as u32;
        let parent = (dir.parent + 1) as u16;

        table.push(id.len() as u8);
        table.push(0);
        match endian {
            Endian::Little => {
                table.extend_from_slice(&extent.to_le_bytes());
                table.extend_from_slice(&parent.to_le_bytes());
            }
            Endian::Big => {
                table.extend_from_slice(&extent.to_be_bytes());
                table.extend_from_slice(&parent.to_be_bytes());
            }
        }
        table.extend_from_slice(&id);
        if id.len() % 2 == 1 {
            table.push(0);
        }
    }
    table
}

/// Records of one directory: `.`, `..`, then subdirectories and files
/// sorted by identifier. The root's `.` carries the SUSP SP marker and a
/// CE pointer to the ER entry.
fn directory_extent(
    index: usize,
    dirs: &[Directory],
    files: &[IsoFile<'_>],
    extents: &[usize],
    er_len: usize,
) -> Result<Vec<u8>> {
    let dir = &dirs[index];
    let parent = &dirs[dir.parent];
    let dir_size = SECTOR_SIZE as u32;

    let dot_su = if index == 0 {
        [susp_sp(), susp_ce(CE_SECTOR as u32, 0, er_len as u32)].concat()
    } else {
        Vec::new()
    };
    let mut extent = dir_record(dir.sector as u32, dir_size, b"\x00", true, &dot_su);
    extent.extend(dir_record(parent.sector as u32, dir_size, b"\x01", true, &[]));

    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    for child in dirs
        .iter()
        .filter(|d| !d.path.is_empty() && parent_of(&d.path) == dir.path)
    {
        let name = name_of(&child.path);
        let id = dir_identifier(name);
        let su = [rrip_nm(name), rrip_px(0o040755, 2)].concat();
        let record = dir_record(child.sector as u32, dir_size, id.as_bytes(), true, &su);
        entries.push((id, record));
    }
    for (file, sector) in files.iter().zip(extents) {
        if parent_of(file.path) != dir.path {
            continue;
        }
        let name = name_of(file.path);
        let id = file_identifier(name);
        let su = [rrip_nm(name), rrip_px(0o100644, 1)].concat();
        let record = dir_record(
            *sector as u32,
            file.data.len() as u32,
            id.as_bytes(),
            false,
            &su,
        );
        entries.push((id, record));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, record) in entries {
        extent.extend(record);
    }

    if extent.len() > SECTOR_SIZE {
        return Err(Error::Validation(format!(
            "ISO directory '{}' has too many entries",
            dir.path
        )));
    }
    Ok(extent)
}

fn write_at(iso: &mut [u8], sector: usize, bytes: &[u8]) {
    let start = sector * SECTOR_SIZE;
    iso[start..start + bytes.len()].copy_from_slice(bytes);
}

fn write_pvd(
    iso: &mut [u8],
    volume_id: &str,
    total_sectors: u32,
    path_table_size: u32,
    root_sector: u32,
) {
    let pvd = &mut iso[PVD_SECTOR * SECTOR_SIZE..(PVD_SECTOR + 1) * SECTOR_SIZE];
    pvd[0] = 1;
    pvd[1..6].copy_from_slice(b"CD001");
    pvd[6] = 1;

    pvd[8..40].fill(b' ');
    pvd[40..72].fill(b' ');
    pvd[40..40 + volume_id.len()].copy_from_slice(volume_id.as_bytes());

    put_u32_both(&mut pvd[80..88], total_sectors);
    put_u16_both(&mut pvd[120..124], 1);
    put_u16_both(&mut pvd[124..128], 1);
    put_u16_both(&mut pvd[128..132], SECTOR_SIZE as u16);
    put_u32_both(&mut pvd[132..140], path_table_size);
    pvd[140..144].copy_from_slice(&(L_PATH_TABLE_SECTOR as u32).to_le_bytes());
    pvd[148..152].copy_from_slice(&(M_PATH_TABLE_SECTOR as u32).to_be_bytes());

    // Root directory record, embedded without a system use area.
    let root = dir_record(root_sector, SECTOR_SIZE as u32, b"\x00", true, &[]);
    pvd[156..156 + root.len()].copy_from_slice(&root);

    pvd[190..814].fill(b' ');
    pvd[881] = 1;
}

fn write_vdst(iso: &mut [u8]) {
    let vdst = &mut iso[VDST_SECTOR * SECTOR_SIZE..(VDST_SECTOR + 1) * SECTOR_SIZE];
    vdst[0] = 255;
    vdst[1..6].copy_from_slice(b"CD001");
    vdst[6] = 1;
}

/// Directory record with an optional system use area. The system use area
/// starts at an even offset, hence the pad byte after even-length names.
fn dir_record(extent: u32, size: u32, name: &[u8], is_dir: bool, su: &[u8]) -> Vec<u8> {
    let padding = usize::from(name.len() % 2 == 0);
    let record_len = 33 + name.len() + padding + su.len();
    let mut buf = vec![0u8; record_len];
    buf[0] = record_len as u8;
    put_u32_both(&mut buf[2..10], extent);
    put_u32_both(&mut buf[10..18], size);
    buf[25] = if is_dir { 0x02 } else { 0x00 };
    put_u16_both(&mut buf[28..32], 1);
    buf[32] = name.len() as u8;
    buf[33..33 + name.len()].copy_from_slice(name);
    let su_start = 33 + name.len() + padding;
    buf[su_start..].copy_from_slice(su);
    buf
}

/// SUSP presence marker.
fn susp_sp() -> Vec<u8> {
    vec![b'S', b'P', 7, 1, 0xBE, 0xEF, 0]
}

/// SUSP continuation area pointer.
fn susp_ce(block: u32, offset: u32, length: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 28];
    buf[0..4].copy_from_slice(&[b'C', b'E', 28, 1]);
    put_u32_both(&mut buf[4..12], block);
    put_u32_both(&mut buf[12..20], offset);
    put_u32_both(&mut buf[20..28], length);
    buf
}

/// SUSP extension reference for RRIP_1991A.
fn susp_er() -> Vec<u8> {
    let id = b"RRIP_1991A";
    let desc =
        b"THE ROCK RIDGE INTERCHANGE PROTOCOL PROVIDES SUPPORT FOR POSIX FILE SYSTEM SEMANTICS";
    let src = b"PLEASE CONTACT DISC PUBLISHER FOR SPECIFICATION SOURCE.  SEE PUBLISHER IDENTIFIER IN PRIMARY VOLUME DESCRIPTOR FOR CONTACT INFORMATION.";
    let total = 8 + id.len() + desc.len() + src.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&[
        b'E',
        b'R',
        total as u8,
        1,
        id.len() as u8,
        desc.len() as u8,
        src.len() as u8,
        1,
    ]);
    buf.extend_from_slice(id);
    buf.extend_from_slice(desc);
    buf.extend_from_slice(src);
    buf
}

/// Rock Ridge alternate name.
fn rrip_nm(name: &str) -> Vec<u8> {
    let mut buf = vec![b'N', b'M', (5 + name.len()) as u8, 1, 0];
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// Rock Ridge POSIX attributes; uid, gid and serial stay zero.
fn rrip_px(mode: u32, nlinks: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 44];
    buf[0..4].copy_from_slice(&[b'P', b'X', 44, 1]);
    put_u32_both(&mut buf[4..12], mode);
    put_u32_both(&mut buf[12..20], nlinks);
    buf
}

fn sanitize(name: &str, keep_dot: bool) -> String {
    name.to_ascii_uppercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (keep_dot && c == '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Level 1 directory identifier: at most 8 characters, no extension.
fn dir_identifier(name: &str) -> String {
    let mut id = sanitize(name, false);
    id.truncate(8);
    id
}

/// Level 1 file identifier: 8.3 with a `;1` version suffix.
fn file_identifier(name: &str) -> String {
    let sanitized = sanitize(name, true);
    match sanitized.split_once('.') {
        Some((base, ext)) => {
            let base = &base[..base.len().min(8)];
            let ext: String = ext.chars().filter(|c| *c != '.').take(3).collect();
            format!("{base}.{ext};1")
        }
        None => format!("{};1", &sanitized[..sanitized.len().min(8)]),
    }
}

/// Empty files still occupy one sector.
fn sectors_for(bytes: usize) -> usize {
    bytes.div_ceil(SECTOR_SIZE).max(1)
}

fn put_u32_both(buf: &mut [u8], val: u32) {
    buf[0..4].copy_from_slice(&val.to_le_bytes());
    buf[4..8].copy_from_slice(&val.to_be_bytes());
}

fn put_u16_both(buf: &mut [u8], val: u16) {
    buf[0..2].copy_from_slice(&val.to_le_bytes());
    buf[2..4].copy_from_slice(&val.to_be_bytes());
}
