//! `mdm zorder`: print the order in which the indexed merge visits the
//! children of a split box.

use std::io::{self, Write};

use anyhow::{Result, bail};
use clap::Args;
use mdmerge_core::morton::{MortonEncoder, bits_for, cell_coords, z_permutation_mixed};
use serde::Serialize;

use crate::output::{OutputMode, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ZorderArgs {
    /// Number of dimensions.
    #[arg(short, long, default_value_t = 2)]
    pub dims: usize,

    /// Split factor, one for all dimensions or one per dimension.
    #[arg(long, value_delimiter = ',', default_value = "2")]
    pub split: Vec<usize>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ZCell {
    pub rank: usize,
    /// Child slot, dimension 0 varying fastest.
    pub cell: usize,
    pub coords: Vec<u32>,
    pub morton: u128,
}

pub fn z_cells(dims: usize, split: &[usize]) -> Result<Vec<ZCell>> {
    let split_into = match split {
        [single] => vec![*single; dims],
        factors if factors.len() == dims => factors.to_vec(),
        factors => bail!("{} split factors for {dims} dimensions", factors.len()),
    };
    let perm = z_permutation_mixed(&split_into)?;
    let bits = split_into.iter().map(|&s| bits_for(s)).max().unwrap_or(1);
    let encoder = MortonEncoder::new(dims, bits)?;
    perm.into_iter()
        .enumerate()
        .map(|(rank, cell)| {
            let coords = cell_coords(cell, &split_into);
            let morton = encoder.encode(&coords)?.value();
            Ok(ZCell {
                rank,
                cell,
                coords,
                morton,
            })
        })
        .collect()
}

pub fn run_zorder(args: &ZorderArgs, output: OutputMode) -> Result<()> {
    let cells = z_cells(args.dims, &args.split)?;
    render_mode(output, &cells, render_text, render_pretty)
}

fn coords_label(coords: &[u32]) -> String {
    let parts: Vec<String> = coords.iter().map(ToString::to_string).collect();
    format!("({})", parts.join(","))
}

fn render_text(cells: &Vec<ZCell>, w: &mut dyn Write) -> io::Result<()> {
    for cell in cells {
        writeln!(
            w,
            "{} {} {} {}",
            cell.rank,
            cell.cell,
            coords_label(&cell.coords),
            cell.morton
        )?;
    }
    Ok(())
}

fn render_pretty(cells: &Vec<ZCell>, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Z order of {} cells", cells.len()))?;
    writeln!(w, "{:>6} {:>6} {:>10}  coords", "rank", "cell", "morton")?;
    for cell in cells {
        writeln!(
            w,
            "{:>6} {:>6} {:>10}  {}",
            cell.rank,
            cell.cell,
            cell.morton,
            coords_label(&cell.coords)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morton_values_increase_with_rank() {
        let cells = z_cells(3, &[2]).expect("cells");
        assert_eq!(cells.len(), 8);
        assert!(cells.windows(2).all(|w| w[0].morton < w[1].morton));
        assert_eq!(cells[3].coords, vec![1, 1, 0]);
    }

    #[test]
    fn per_dimension_factors_must_match() {
        assert_eq!(z_cells(2, &[4, 2]).expect("cells").len(), 8);
        assert!(z_cells(3, &[4, 2]).is_err());
    }
}
