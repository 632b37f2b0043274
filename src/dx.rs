//! For reading and writing OpenDX scalar maps (`.dx`). This is the volumetric format read by
//! VMD, PyMOL and Chimera for grid data, e.g. from APBS.
//!
//! We write the regular-grid subset of the format: a `gridpositions` object with origin and
//! a diagonal delta, a `gridconnections` object, and a double array in raster order
//! (z fastest). Values are written in shortest round-trip form, so `load` after `save`
//! reproduces them exactly.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write},
    path::Path,
};

use lin_alg::f64::Vec3;

use crate::{PmapError, Result, SpatialGrid};

const VALUES_PER_LINE: usize = 3;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg.into())
}

fn parse_f64(tok: Option<&str>, what: &str) -> io::Result<f64> {
    tok.ok_or_else(|| invalid(format!("Missing {what} in DX header")))?
        .parse::<f64>()
        .map_err(|_| invalid(format!("Invalid {what} in DX header")))
}

fn parse_usize(tok: Option<&str>, what: &str) -> io::Result<usize> {
    tok.ok_or_else(|| invalid(format!("Missing {what} in DX header")))?
        .parse::<usize>()
        .map_err(|_| invalid(format!("Invalid {what} in DX header")))
}

/// Write a grid as DX text.
pub fn write_dx<W: Write>(w: &mut W, grid: &SpatialGrid, comment: &str) -> io::Result<()> {
    let [nx, ny, nz] = grid.dims;
    let (o, d) = (grid.origin, grid.delta);

    for line in comment.lines() {
        writeln!(w, "# {line}")?;
    }
    writeln!(w, "object 1 class gridpositions counts {nx} {ny} {nz}")?;
    writeln!(w, "origin {} {} {}", o.x, o.y, o.z)?;
    writeln!(w, "delta {} 0 0", d.x)?;
    writeln!(w, "delta 0 {} 0", d.y)?;
    writeln!(w, "delta 0 0 {}", d.z)?;
    writeln!(w, "object 2 class gridconnections counts {nx} {ny} {nz}")?;
    writeln!(
        w,
        "object 3 class array type double rank 0 items {} data follows",
        grid.len()
    )?;

    for row in grid.values.chunks(VALUES_PER_LINE) {
        let line: Vec<String> = row.iter().map(|v| format!("{v:e}")).collect();
        writeln!(w, "{}", line.join(" "))?;
    }

    writeln!(w, "attribute \"dep\" string \"positions\"")?;
    writeln!(w, "object \"regular positions regular connections\" class field")?;
    writeln!(w, "component \"positions\" value 1")?;
    writeln!(w, "component \"connections\" value 2")?;
    writeln!(w, "component \"data\" value 3")?;

    Ok(())
}

/// Parse DX text into a grid. Only regular, axis-aligned grids are supported.
pub fn read_dx<R: BufRead>(r: R) -> io::Result<SpatialGrid> {
    let mut dims: Option<[usize; 3]> = None;
    let mut origin: Option<Vec3> = None;
    let mut deltas: Vec<[f64; 3]> = Vec::with_capacity(3);
    let mut n_items: Option<usize> = None;
    let mut values: Vec<f64> = Vec::new();

    let mut lines = r.lines();

    while let Some(line) = lines.next() {
        let line = line?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }

        let mut parts = t.split_whitespace();

        match parts.next() {
            Some("origin") => {
                origin = Some(Vec3::new(
                    parse_f64(parts.next(), "origin")?,
                    parse_f64(parts.next(), "origin")?,
                    parse_f64(parts.next(), "origin")?,
                ));
            }
            Some("delta") => {
                deltas.push([
                    parse_f64(parts.next(), "delta")?,
                    parse_f64(parts.next(), "delta")?,
                    parse_f64(parts.next(), "delta")?,
                ]);
            }
            Some("object") if t.contains("class gridpositions") => {
                let counts = t
                    .split("counts")
                    .nth(1)
                    .ok_or_else(|| invalid("Missing grid counts"))?;
                let mut c = counts.split_whitespace();
                dims = Some([
                    parse_usize(c.next(), "grid count")?,
                    parse_usize(c.next(), "grid count")?,
                    parse_usize(c.next(), "grid count")?,
                ]);
            }
            Some("object") if t.contains("class array") => {
                let items = t
                    .split("items")
                    .nth(1)
                    .ok_or_else(|| invalid("Missing item count in DX array header"))?;
                let n = parse_usize(items.split_whitespace().next(), "item count")?;
                n_items = Some(n);
                values.reserve(n);

                // The data block follows directly.
                while values.len() < n {
                    let Some(data_line) = lines.next() else {
                        break;
                    };
                    let data_line = data_line?;
                    for tok in data_line.split_whitespace() {
                        let v = tok
                            .parse::<f64>()
                            .map_err(|_| invalid(format!("Invalid DX data value: {tok}")))?;
                        values.push(v);
                    }
                }
            }
            _ => (), // gridconnections, attributes, field components.
        }
    }

    let dims = dims.ok_or_else(|| invalid("DX file has no gridpositions object"))?;
    let origin = origin.ok_or_else(|| invalid("DX file has no origin"))?;
    let n_items = n_items.ok_or_else(|| invalid("DX file has no data array"))?;

    if deltas.len() != 3 {
        return Err(invalid(format!(
            "Expected 3 delta lines in DX header; got {}",
            deltas.len()
        )));
    }
    for (axis, row) in deltas.iter().enumerate() {
        for (col, v) in row.iter().enumerate() {
            if col != axis && *v != 0. {
                return Err(invalid("Only axis-aligned (diagonal) DX deltas are supported"));
            }
        }
    }
    let delta = Vec3::new(deltas[0][0], deltas[1][1], deltas[2][2]);

    if n_items != dims[0] * dims[1] * dims[2] || values.len() != n_items {
        return Err(invalid(format!(
            "DX item count mismatch: dims {dims:?}, declared {n_items}, read {}",
            values.len()
        )));
    }

    SpatialGrid::new(origin, delta, dims, values).map_err(|e| invalid(e.to_string()))
}

impl SpatialGrid {
    /// Save to a `.dx` file.
    pub fn save_dx(&self, path: &Path, comment: &str) -> Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        write_dx(&mut w, self, comment)?;
        w.flush()?;

        Ok(())
    }

    /// Load a `.dx` file.
    pub fn load_dx(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PmapError::from_open(e, path))?;
        Ok(read_dx(BufReader::new(file))?)
    }
}
