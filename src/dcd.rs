//! For reading and writing the DCD trajectory format (CHARMM/NAMD/OpenMM; read by VMD and
//! MDAnalysis). Frames are streamed one at a time, so a trajectory is never held in memory.
//!
//! Only little-endian files with 32-bit coordinates and no fixed atoms are supported. The
//! optional CHARMM unit-cell block is read as six doubles in the order `a, γ, b, β, α, c`.
//! Some writers (NAMD) store the angles as cosines; values with magnitude ≤ 1 are taken as such.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use lin_alg::f64::Vec3;

use crate::{Frame, PmapError, Result};

/// Periodic box of one frame. Lengths in Å, angles in degrees.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        }
    }

    /// A rectangular box.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Self {
        Self::new(a, b, c, 90., 90., 90.)
    }

    /// Å³. General triclinic form.
    pub fn volume(&self) -> f64 {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        let f = 1. - ca * ca - cb * cb - cg * cg + 2. * ca * cb * cg;
        self.a * self.b * self.c * f.max(0.).sqrt()
    }
}

#[derive(Clone, Debug)]
pub struct DcdHeader {
    /// As declared by the header. Some writers leave this at 0 when a run is interrupted.
    pub n_frames: usize,
    pub n_atoms: usize,
    /// Time between frames, in the writer's units.
    pub timestep: f32,
    pub has_unit_cell: bool,
    pub title: String,
}

/// Streams frames from a DCD file. Iterate to read them in order.
pub struct DcdReader<R> {
    reader: R,
    header: DcdHeader,
    frames_read: usize,
    done: bool,
}

impl DcdReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PmapError::from_open(e, path))?;
        Ok(Self::new(BufReader::new(file))?)
    }
}

impl<R: Read> DcdReader<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let hdr = read_record(&mut reader)?;
        if hdr.len() != 84 || &hdr[0..4] != b"CORD" {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Not a little-endian CORD/DCD file",
            ));
        }

        let mut icntrl = [0i32; 20];
        let mut cur = &hdr[4..];
        for item in icntrl.iter_mut() {
            *item = cur.read_i32::<LittleEndian>()?;
        }
        // ICNTRL[10] (the delta) is a float.
        let timestep = f32::from_le_bytes([hdr[40], hdr[41], hdr[42], hdr[43]]);

        if icntrl[8] != 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "DCD files with fixed atoms are not supported",
            ));
        }
        let is_charmm = icntrl[19] != 0;
        let has_unit_cell = is_charmm && icntrl[10] != 0;
        if is_charmm && icntrl[11] != 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "DCD files with a 4th dimension are not supported",
            ));
        }

        let title_block = read_record(&mut reader)?;
        let title = title_block
            .get(4..)
            .map(|t| String::from_utf8_lossy(t).trim_end_matches(['\0', ' ']).to_owned())
            .unwrap_or_default();

        let natom_block = read_record(&mut reader)?;
        if natom_block.len() != 4 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Unexpected NATOM block size",
            ));
        }
        let n_atoms = (&natom_block[..]).read_i32::<LittleEndian>()?;

        Ok(Self {
            reader,
            header: DcdHeader {
                n_frames: icntrl[0].max(0) as usize,
                n_atoms: n_atoms.max(0) as usize,
                timestep,
                has_unit_cell,
                title,
            },
            frames_read: 0,
            done: false,
        })
    }

    pub fn header(&self) -> &DcdHeader {
        &self.header
    }

    /// Read the next frame; `None` at a clean end of file.
    pub fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        let n = self.header.n_atoms;

        let unit_cell = if self.header.has_unit_cell {
            let Some(cell) = read_record_or_eof(&mut self.reader)? else {
                return Ok(None);
            };
            if cell.len() != 48 {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    "Unexpected unit cell block size",
                ));
            }
            let mut c = [0f64; 6];
            let mut cur = &cell[..];
            for v in &mut c {
                *v = cur.read_f64::<LittleEndian>()?;
            }
            Some(UnitCell::new(
                c[0],
                c[2],
                c[5],
                angle_deg(c[4]),
                angle_deg(c[3]),
                angle_deg(c[1]),
            ))
        } else {
            None
        };

        let xb = match read_record_or_eof(&mut self.reader)? {
            Some(b) => b,
            None if unit_cell.is_none() => return Ok(None),
            None => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "DCD frame truncated after unit cell",
                ));
            }
        };
        let yb = read_record(&mut self.reader)?;
        let zb = read_record(&mut self.reader)?;

        if xb.len() != 4 * n || yb.len() != 4 * n || zb.len() != 4 * n {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Coordinate block size mismatch",
            ));
        }

        let (mut xs, mut ys, mut zs) = (&xb[..], &yb[..], &zb[..]);
        let mut atom_posits = Vec::with_capacity(n);
        for _ in 0..n {
            atom_posits.push(Vec3::new(
                xs.read_f32::<LittleEndian>()? as f64,
                ys.read_f32::<LittleEndian>()? as f64,
                zs.read_f32::<LittleEndian>()? as f64,
            ));
        }

        self.frames_read += 1;

        Ok(Some(Frame {
            atom_posits,
            unit_cell,
        }))
    }
}

impl<R: Read> Iterator for DcdReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                if self.header.n_frames != 0 && self.frames_read < self.header.n_frames {
                    log::warn!(
                        "DCD header declares {} frames; file ended after {}",
                        self.header.n_frames,
                        self.frames_read
                    );
                }
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

fn angle_deg(v: f64) -> f64 {
    if v.abs() <= 1. { v.acos().to_degrees() } else { v }
}

/// Writes frames to a new DCD file as they arrive. The frame count in the header is patched in
/// by [`DcdWriter::finish`].
pub struct DcdWriter {
    file: BufWriter<File>,
    n_atoms: usize,
    with_unit_cell: bool,
    n_frames: i32,
}

impl DcdWriter {
    pub fn create(path: &Path, n_atoms: usize, with_unit_cell: bool, timestep: f32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut file = BufWriter::new(file);

        let mut header = Vec::with_capacity(84);
        header.extend_from_slice(b"CORD");

        let mut icntrl = [0i32; 20];
        icntrl[1] = 0; // ISTART
        icntrl[2] = 1; // NSAVC
        icntrl[10] = with_unit_cell as i32;
        icntrl[19] = 24; // CHARMM version

        for v in icntrl {
            header.write_i32::<LittleEndian>(v)?;
        }
        header[40..44].copy_from_slice(&timestep.to_le_bytes());
        write_record(&mut file, &header)?;

        let title = format!("Created by pmapper  NATOMS={n_atoms}");
        let mut line = [b' '; 80];
        let tb = title.as_bytes();
        let n = tb.len().min(80);
        line[..n].copy_from_slice(&tb[..n]);

        let mut title_block = Vec::with_capacity(4 + 80);
        title_block.write_i32::<LittleEndian>(1)?;
        title_block.extend_from_slice(&line);
        write_record(&mut file, &title_block)?;

        write_record(&mut file, &(n_atoms as i32).to_le_bytes())?;

        Ok(Self {
            file,
            n_atoms,
            with_unit_cell,
            n_frames: 0,
        })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.atom_posits.len() != self.n_atoms {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "Frame has {} atoms; the DCD file has {}",
                    frame.atom_posits.len(),
                    self.n_atoms
                ),
            )
            .into());
        }

        if self.with_unit_cell {
            let cell = frame.unit_cell.as_ref().ok_or_else(|| {
                io::Error::new(ErrorKind::InvalidInput, "Frame is missing its unit cell")
            })?;
            let mut block = Vec::with_capacity(48);
            for v in [cell.a, cell.gamma, cell.b, cell.beta, cell.alpha, cell.c] {
                block.write_f64::<LittleEndian>(v)?;
            }
            write_record(&mut self.file, &block)?;
        }

        let mut xb = Vec::with_capacity(4 * self.n_atoms);
        let mut yb = Vec::with_capacity(4 * self.n_atoms);
        let mut zb = Vec::with_capacity(4 * self.n_atoms);
        for p in &frame.atom_posits {
            xb.write_f32::<LittleEndian>(p.x as f32)?;
            yb.write_f32::<LittleEndian>(p.y as f32)?;
            zb.write_f32::<LittleEndian>(p.z as f32)?;
        }
        write_record(&mut self.file, &xb)?;
        write_record(&mut self.file, &yb)?;
        write_record(&mut self.file, &zb)?;

        self.n_frames = self
            .n_frames
            .checked_add(1)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "NSET overflow"))?;

        Ok(())
    }

    /// Write the frame count into the header, and flush.
    pub fn finish(mut self) -> Result<()> {
        self.file.flush()?;
        let file = self.file.get_mut();
        // Payload offset: 4-byte record marker + "CORD".
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&self.n_frames.to_le_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// A DCD record: payload sandwiched by its length.
fn write_record<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = payload.len() as u32;

    w.write_u32::<LittleEndian>(len)?;
    w.write_all(payload)?;
    w.write_u32::<LittleEndian>(len)
}

fn read_record<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    read_record_or_eof(r)?
        .ok_or_else(|| io::Error::new(ErrorKind::UnexpectedEof, "DCD file ended mid-header"))
}

/// `None` if the reader is exactly at end of file.
fn read_record_or_eof<R: Read>(r: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = r.read(&mut len_bytes[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "DCD record marker truncated",
            ));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;

    let len_end = r.read_u32::<LittleEndian>()? as usize;
    if len_end != len {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "record length mismatch",
        ));
    }
    Ok(Some(payload))
}
