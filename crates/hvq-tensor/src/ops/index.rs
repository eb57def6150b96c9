// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Row lookups against a `(K, C)` table.

use super::array;
use crate::autograd::BackwardNode;
use crate::error::{PureResult, TensorError};
use crate::tensor::Tensor;
use ndarray::{Array2, ArrayD, Axis};

fn matrix_dims(tensor: &Tensor, op: &'static str) -> PureResult<(usize, usize)> {
    match tensor.shape().as_slice() {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(TensorError::RankMismatch {
            op,
            expected: 2,
            shape: other.to_vec(),
        }),
    }
}

/// Gathers rows of `table` into an `(indices.len(), C)` tensor. The backward
/// pass scatter-adds into the table, so repeated indices accumulate.
pub fn index_select_rows(table: &Tensor, indices: &[usize]) -> PureResult<Tensor> {
    let (rows, cols) = matrix_dims(table, "index_select_rows")?;
    if let Some(&bad) = indices.iter().find(|&&index| index >= rows) {
        return Err(TensorError::IndexOutOfRange {
            index: bad,
            len: rows,
        });
    }
    let values = table.with_data(|data| {
        let mut out = Vec::with_capacity(indices.len() * cols);
        for &index in indices {
            out.extend(data.index_axis(Axis(0), index).iter().copied());
        }
        out
    });
    let y = array(&[indices.len(), cols], values)?;

    struct Node {
        table: Tensor,
        indices: Vec<usize>,
        rows: usize,
        cols: usize,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "index_select_rows"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.table.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let mut grad = vec![0.0f32; self.rows * self.cols];
            for (&index, upstream) in self.indices.iter().zip(go.axis_iter(Axis(0))) {
                let dst = &mut grad[index * self.cols..(index + 1) * self.cols];
                for (slot, g) in dst.iter_mut().zip(upstream.iter()) {
                    *slot += *g;
                }
            }
            Ok(vec![Some(array(&[self.rows, self.cols], grad)?)])
        }
    }
    Ok(Tensor::from_op(y, &[table], || Node {
        table: table.clone(),
        indices: indices.to_vec(),
        rows,
        cols,
    }))
}

/// Squared Euclidean distance between every row of `rows` `(N, C)` and every
/// row of `table` `(K, C)`, as an `(N, K)` matrix. Not differentiable.
pub fn pairwise_sq_distances(rows: &Tensor, table: &Tensor) -> PureResult<Array2<f32>> {
    let (n, c) = matrix_dims(rows, "pairwise_sq_distances")?;
    let (k, tc) = matrix_dims(table, "pairwise_sq_distances")?;
    if c != tc {
        return Err(TensorError::shapes(&[n, c], &[k, tc]));
    }
    let lhs = rows.to_vec();
    let rhs = table.to_vec();
    let mut out = Array2::<f32>::zeros((n, k));
    for (i, mut dist_row) in out.axis_iter_mut(Axis(0)).enumerate() {
        let x = &lhs[i * c..(i + 1) * c];
        for (j, slot) in dist_row.iter_mut().enumerate() {
            let e = &rhs[j * c..(j + 1) * c];
            *slot = x
                .iter()
                .zip(e)
                .map(|(a, b)| {
                    let d = a - b;
                    d * d
                })
                .sum();
        }
    }
    Ok(out)
}

/// Index of the nearest table row for each input row. Ties resolve to the
/// lowest index.
pub fn nearest_rows(rows: &Tensor, table: &Tensor) -> PureResult<Vec<usize>> {
    let (_, k) = matrix_dims(table, "nearest_rows")?;
    if k == 0 {
        return Err(TensorError::EmptyInput("nearest_rows table"));
    }
    let distances = pairwise_sq_distances(rows, table)?;
    Ok(distances
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for (j, &d) in row.iter().enumerate() {
                if d < best_dist {
                    best = j;
                    best_dist = d;
                }
            }
            best
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_gathers_rows_in_order() {
        let table = Tensor::from_vec(&[3, 2], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let picked = index_select_rows(&table, &[2, 0, 2]).unwrap();
        assert_eq!(picked.shape(), vec![3, 2]);
        assert_eq!(picked.to_vec(), vec![4.0, 5.0, 0.0, 1.0, 4.0, 5.0]);
    }

    #[test]
    fn select_backward_accumulates_repeats() {
        let table = Tensor::zeros(&[3, 2]).requires_grad(true);
        let picked = index_select_rows(&table, &[1, 1, 0]).unwrap();
        let weights = Tensor::from_vec(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        picked.mul(&weights).unwrap().sum().unwrap().backward().unwrap();
        let grad: Vec<f32> = table.grad().unwrap().iter().copied().collect();
        assert_eq!(grad, vec![5.0, 6.0, 4.0, 6.0, 0.0, 0.0]);
    }

    #[test]
    fn select_rejects_out_of_range() {
        let table = Tensor::zeros(&[2, 2]);
        assert_eq!(
            index_select_rows(&table, &[0, 2]).unwrap_err(),
            TensorError::IndexOutOfRange { index: 2, len: 2 }
        );
    }

    #[test]
    fn nearest_prefers_lowest_index_on_ties() {
        let table = Tensor::from_vec(&[3, 1], vec![1.0, -1.0, 1.0]).unwrap();
        let rows = Tensor::from_vec(&[3, 1], vec![0.0, 0.9, -5.0]).unwrap();
        assert_eq!(nearest_rows(&rows, &table).unwrap(), vec![0, 0, 1]);
    }

    #[test]
    fn distances_are_squared_euclidean() {
        let table = Tensor::from_vec(&[2, 2], vec![0.0, 0.0, 3.0, 4.0]).unwrap();
        let rows = Tensor::from_vec(&[1, 2], vec![0.0, 0.0]).unwrap();
        let d = pairwise_sq_distances(&rows, &table).unwrap();
        assert_eq!(d[[0, 0]], 0.0);
        assert_eq!(d[[0, 1]], 25.0);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let table = Tensor::zeros(&[2, 3]);
        let rows = Tensor::zeros(&[1, 2]);
        assert!(nearest_rows(&rows, &table).is_err());
    }
}
