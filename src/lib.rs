//! Probability maps of cosolvent probe occupancy around a protein, built from MD snapshots.
//!
//! The flow is: [`accumulate`] probe atoms into count grids over a trajectory, [`normalize`]
//! them against a [`distance`] mask into probabilities (optionally free energies), optionally
//! [`combine`] maps from independent runs, then [`extract`] the residue environments of probes
//! sitting in high-probability regions. Grids are saved and loaded as OpenDX files.

pub mod accumulate;
pub mod combine;
pub mod config;
pub mod dcd;
pub mod distance;
pub mod dx;
mod error;
pub mod extract;
pub mod grid;
pub mod normalize;
pub mod pdb;
pub mod pipeline;
pub mod range;

use lin_alg::f64::Vec3;
use na_seq::Element;

pub use accumulate::*;
pub use combine::*;
pub use config::*;
pub use distance::*;
pub use error::*;
pub use extract::*;
pub use grid::*;
pub use normalize::*;
pub use range::*;

/// One atom of a structural snapshot, with the naming used to select it.
#[derive(Clone, Debug)]
pub struct AtomRecord {
    pub serial_number: u32,
    /// E.g. "CA", "OH2", "C1".
    pub name: String,
    pub res_name: String,
    pub chain_id: String,
    pub res_id: i32,
    /// Å
    pub posit: Vec3,
    pub element: Option<Element>,
    /// From a `HETATM` record: ligands, cofactors, waters and ions; not standard residues.
    pub hetero: bool,
}

impl AtomRecord {
    /// Uses the element if known; otherwise the PDB naming convention of a leading `H`
    /// (after any digits, e.g. "1HB").
    pub fn is_hydrogen(&self) -> bool {
        match &self.element {
            Some(el) => matches!(el, Element::Hydrogen),
            None => self
                .name
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .starts_with('H'),
        }
    }

    pub fn residue_key(&self) -> ResidueKey {
        ResidueKey {
            chain_id: self.chain_id.clone(),
            res_id: self.res_id,
        }
    }
}

/// Identifies one residue instance within a model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResidueKey {
    pub chain_id: String,
    pub res_id: i32,
}

/// One structural snapshot: a model of a multi-model file, or a reference structure. When used
/// as a topology for a trajectory, atom order matches the trajectory's coordinate order.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub atoms: Vec<AtomRecord>,
}

impl Model {
    pub fn has_residue(&self, res_name: &str) -> bool {
        self.atoms.iter().any(|a| a.res_name == res_name)
    }

    /// Mass-weighted center of the standard (non-hetero) residues. `None` if there are none.
    pub fn protein_center(&self) -> Option<Vec3> {
        let mut sum = Vec3::new(0., 0., 0.);
        let mut mass_total = 0.;

        for atom in self.atoms.iter().filter(|a| !a.hetero) {
            let m = atom_mass(atom);
            sum = Vec3::new(
                sum.x + atom.posit.x * m,
                sum.y + atom.posit.y * m,
                sum.z + atom.posit.z * m,
            );
            mass_total += m;
        }

        if mass_total == 0. {
            return None;
        }
        Some(Vec3::new(
            sum.x / mass_total,
            sum.y / mass_total,
            sum.z / mass_total,
        ))
    }
}

/// Daltons. Covers the elements of proteins and common cosolvents; others weigh as carbon.
fn atom_mass(atom: &AtomRecord) -> f64 {
    match &atom.element {
        Some(Element::Hydrogen) => 1.008,
        Some(Element::Carbon) => 12.011,
        Some(Element::Nitrogen) => 14.007,
        Some(Element::Oxygen) => 15.999,
        Some(Element::Phosphorus) => 30.974,
        Some(Element::Sulfur) => 32.06,
        _ if atom.is_hydrogen() => 1.008,
        _ => 12.011,
    }
}

/// Coordinates of one trajectory frame. Atom order follows the topology [`Model`].
#[derive(Clone, Debug)]
pub struct Frame {
    /// Å
    pub atom_posits: Vec<Vec3>,
    pub unit_cell: Option<dcd::UnitCell>,
}

impl Frame {
    /// Å³
    pub fn volume(&self) -> Option<f64> {
        self.unit_cell.as_ref().map(|c| c.volume())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    pub fn atom(serial: u32, name: &str, res_name: &str, res_id: i32, posit: [f64; 3]) -> AtomRecord {
        let element = match name.trim_start_matches(|c: char| c.is_ascii_digit()).chars().next() {
            Some('H') => Some(Element::Hydrogen),
            Some('N') => Some(Element::Nitrogen),
            Some('O') => Some(Element::Oxygen),
            Some('S') => Some(Element::Sulfur),
            _ => Some(Element::Carbon),
        };

        AtomRecord {
            serial_number: serial,
            name: name.to_owned(),
            res_name: res_name.to_owned(),
            chain_id: "A".to_owned(),
            res_id,
            posit: Vec3::new(posit[0], posit[1], posit[2]),
            element,
            hetero: false,
        }
    }
}
