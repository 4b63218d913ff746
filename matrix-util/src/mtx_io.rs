use crate::common_io::*;
use std::io::Write;

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write (0-based)
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(usize, usize, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;

    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, triplets.len())?;

    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Shape line of a MatrixMarket file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtxShape {
    pub nrow: usize,
    pub ncol: usize,
    pub nnz: usize,
}

/// Read a matrix market file and return 0-based triplets `(row, col,
/// val)` sorted by column, then row
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx_triplets(mtx_file: &str) -> anyhow::Result<(Vec<(usize, usize, f32)>, MtxShape)> {
    let ReadLinesOut { lines, header } = read_lines_of_words(mtx_file, 0)?;

    if header.len() != 3 {
        anyhow::bail!("{}: failed to parse the mtx shape line", mtx_file);
    }

    let shape = MtxShape {
        nrow: header[0].parse()?,
        ncol: header[1].parse()?,
        nnz: header[2].parse()?,
    };

    let mut triplets = Vec::with_capacity(lines.len());
    for (i, words) in lines.iter().enumerate() {
        if words.len() != 3 {
            anyhow::bail!("{}: entry {} is not a triplet", mtx_file, i + 1);
        }
        let row: usize = words[0].parse()?;
        let col: usize = words[1].parse()?;
        let val: f32 = words[2].parse()?;
        if row == 0 || col == 0 || row > shape.nrow || col > shape.ncol {
            anyhow::bail!("{}: entry ({}, {}) out of range", mtx_file, row, col);
        }
        triplets.push((row - 1, col - 1, val));
    }

    if triplets.len() != shape.nnz {
        log::warn!(
            "{}: header says {} non-zeros, found {}",
            mtx_file,
            shape.nnz,
            triplets.len()
        );
    }

    triplets.sort_by_key(|&(row, col, _)| (col, row));
    Ok((triplets, shape))
}
