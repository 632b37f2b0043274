//! Streaming access to multi-model PDB files, e.g. snapshots written by cpptraj or MDAnalysis,
//! and an incremental multi-model writer for extracted structures.
//!
//! Only `ATOM`/`HETATM`, `MODEL`, `ENDMDL` and `END` records are interpreted; everything else is
//! skipped. Columns follow the wwPDB fixed-width layout, except that the residue name may spill
//! into column 21 (4-character names, as some MD tools write).

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write},
    path::Path,
};

use lin_alg::f64::Vec3;
use na_seq::Element;

use crate::{AtomRecord, Model, PmapError, Result};

/// Iterates over the models of a PDB stream, reading one model at a time.
pub struct PdbModels<R> {
    lines: io::Lines<R>,
    line_num: usize,
    done: bool,
}

impl PdbModels<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PmapError::from_open(e, path))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> PdbModels<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_num: 0,
            done: false,
        }
    }

    fn read_model(&mut self) -> io::Result<Option<Model>> {
        let mut atoms = Vec::new();
        let mut in_model = false;

        for line in self.lines.by_ref() {
            let line = line?;
            self.line_num += 1;

            let rec = line.get(0..6).unwrap_or(&line).trim_end();
            match rec {
                "ATOM" | "HETATM" => {
                    atoms.push(parse_atom_line(&line, self.line_num, atoms.len())?);
                }
                "MODEL" => {
                    if !atoms.is_empty() {
                        // A MODEL record without a closing ENDMDL for the previous one.
                        return Err(io::Error::new(
                            ErrorKind::InvalidData,
                            format!("MODEL on line {} before ENDMDL", self.line_num),
                        ));
                    }
                    in_model = true;
                }
                "ENDMDL" => return Ok(Some(Model { atoms })),
                "END" if !atoms.is_empty() => return Ok(Some(Model { atoms })),
                _ => (),
            }
        }

        if atoms.is_empty() && !in_model {
            Ok(None)
        } else {
            Ok(Some(Model { atoms }))
        }
    }
}

impl<R: BufRead> Iterator for PdbModels<R> {
    type Item = Result<Model>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_model() {
            Ok(Some(m)) => Some(Ok(m)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

fn col(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).unwrap_or("").trim()
}

fn parse_coord(line: &str, start: usize, line_num: usize) -> io::Result<f64> {
    col(line, start, start + 8).parse::<f64>().map_err(|_| {
        io::Error::new(
            ErrorKind::InvalidData,
            format!("Invalid coordinate on line {line_num}"),
        )
    })
}

fn parse_atom_line(line: &str, line_num: usize, i_in_model: usize) -> io::Result<AtomRecord> {
    // VMD writes hex serials past 99999; fall back to position in the model.
    let serial_number = col(line, 6, 11)
        .parse::<u32>()
        .unwrap_or(i_in_model as u32 + 1);

    let res_id = col(line, 22, 26).parse::<i32>().map_err(|_| {
        io::Error::new(
            ErrorKind::InvalidData,
            format!("Invalid residue number on line {line_num}"),
        )
    })?;

    let posit = Vec3::new(
        parse_coord(line, 30, line_num)?,
        parse_coord(line, 38, line_num)?,
        parse_coord(line, 46, line_num)?,
    );

    let element = match col(line, 76, 78) {
        "" => None,
        el => Element::from_letter(el).ok(),
    };

    Ok(AtomRecord {
        serial_number,
        name: col(line, 12, 16).to_owned(),
        res_name: col(line, 17, 21).to_owned(),
        chain_id: col(line, 21, 22).to_owned(),
        res_id,
        posit,
        element,
        hetero: line.starts_with("HETATM"),
    })
}

impl Model {
    /// Load the first model of a PDB file, e.g. a reference structure or a topology.
    pub fn load_pdb(path: &Path) -> Result<Self> {
        PdbModels::open(path)?.next().unwrap_or_else(|| {
            Err(PmapError::value(format!(
                "No atoms found in {}",
                path.display()
            )))
        })
    }
}

/// Appends models to a PDB stream as `MODEL`/`ENDMDL` blocks, flushing after each.
pub struct PdbWriter<W: Write> {
    w: W,
    n_models: usize,
}

impl PdbWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> PdbWriter<W> {
    pub fn new(w: W) -> Self {
        Self { w, n_models: 0 }
    }

    pub fn n_models(&self) -> usize {
        self.n_models
    }

    pub fn write_model(&mut self, model: &Model) -> io::Result<()> {
        self.n_models += 1;
        writeln!(self.w, "MODEL     {:>4}", self.n_models)?;

        for atom in &model.atoms {
            write_atom_line(&mut self.w, atom)?;
        }

        writeln!(self.w, "ENDMDL")?;
        self.w.flush()
    }

    pub fn finish(mut self) -> io::Result<W> {
        writeln!(self.w, "END")?;
        self.w.flush()?;
        Ok(self.w)
    }
}

fn write_atom_line<W: Write>(w: &mut W, atom: &AtomRecord) -> io::Result<()> {
    let record = if atom.hetero { "HETATM" } else { "ATOM" };

    // Names shorter than 4 start in column 14, by convention.
    let name = if atom.name.len() < 4 {
        format!(" {:<3}", atom.name)
    } else {
        atom.name.clone()
    };

    let element = atom
        .element
        .as_ref()
        .map(|e| e.to_letter())
        .unwrap_or_default();

    writeln!(
        w,
        "{:<6}{:>5} {:<4} {:<4}{:1}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
        record,
        atom.serial_number % 100_000,
        name,
        atom.res_name,
        atom.chain_id.chars().next().unwrap_or(' '),
        atom.res_id.rem_euclid(10_000),
        atom.posit.x,
        atom.posit.y,
        atom.posit.z,
        1.0,
        0.0,
        element,
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::test_util::atom;

    const TWO_MODELS: &str = "\
REMARK   generated by a test
MODEL        1
ATOM      1  N   ALA A   1      11.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  ALA A   1      11.639   6.071  -5.147  1.00  0.00           C
HETATM    3  C1  BNZ B 201       1.000   2.000   3.000  1.00  0.00           C
TER
ENDMDL
MODEL        2
ATOM      1  N   ALA A   1      12.104   6.134  -6.504  1.00  0.00           N
ATOM      2  CA  ALA A   1      12.639   6.071  -5.147  1.00  0.00           C
HETATM    3  C1  BNZ B 201       2.000   2.000   3.000  1.00  0.00           C
ENDMDL
END
";

    #[test]
    fn test_stream_models() {
        let models: Vec<Model> = PdbModels::new(Cursor::new(TWO_MODELS))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].atoms.len(), 3);

        let a = &models[0].atoms[1];
        assert_eq!(a.name, "CA");
        assert_eq!(a.res_name, "ALA");
        assert_eq!(a.chain_id, "A");
        assert_eq!(a.res_id, 1);
        assert!((a.posit.x - 11.639).abs() < 1e-9);
        assert!(!a.hetero);

        let b = &models[1].atoms[2];
        assert!(b.hetero);
        assert_eq!(b.res_name, "BNZ");
        assert_eq!(b.res_id, 201);
        assert!((b.posit.x - 2.).abs() < 1e-9);
    }

    #[test]
    fn test_single_model_without_model_records() {
        let text = "\
ATOM      1  CA  GLY A   5       0.000   0.000   0.000  1.00  0.00           C
ATOM      2  CA  GLY A   6       3.800   0.000   0.000  1.00  0.00           C
END
";
        let models: Vec<Model> = PdbModels::new(Cursor::new(text))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].atoms[1].res_id, 6);
    }

    #[test]
    fn test_bad_coordinate() {
        let text = "ATOM      1  CA  GLY A   5       x.000   0.000   0.000\n";
        let mut it = PdbModels::new(Cursor::new(text));
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let mut lig = atom(3, "C1", "BNZ", 201, [1., 2., 3.]);
        lig.hetero = true;
        lig.chain_id = "B".to_owned();
        let model = Model {
            atoms: vec![
                atom(1, "N", "ALA", 1, [11.104, 6.134, -6.504]),
                atom(2, "CA", "ALA", 1, [11.639, 6.071, -5.147]),
                lig,
            ],
        };

        let mut w = PdbWriter::new(Vec::new());
        w.write_model(&model).unwrap();
        w.write_model(&model).unwrap();
        assert_eq!(w.n_models(), 2);
        let bytes = w.finish().unwrap();

        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("ATOM      2  CA  ALA A   1      11.639   6.071  -5.147"));

        let back: Vec<Model> = PdbModels::new(Cursor::new(text))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].atoms.len(), 3);
        assert_eq!(back[1].atoms[2].chain_id, "B");
        assert!(back[1].atoms[2].hetero);
        assert!(back[0].atoms[0].element.is_some());
    }
}
