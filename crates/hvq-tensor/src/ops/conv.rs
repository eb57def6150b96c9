// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Direct (loop-based) 2D convolutions over NCHW tensors.

use super::{array, flat};
use crate::autograd::BackwardNode;
use crate::error::{PureResult, TensorError};
use crate::tensor::Tensor;
use ndarray::ArrayD;

/// Stride and symmetric zero padding shared by both convolution flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
}

impl Conv2dGeometry {
    pub fn new(stride: (usize, usize), padding: (usize, usize)) -> PureResult<Self> {
        if stride.0 == 0 || stride.1 == 0 {
            return Err(TensorError::InvalidValue { label: "stride" });
        }
        Ok(Self { stride, padding })
    }

    /// Output size of a forward convolution.
    pub fn conv_output(
        &self,
        input: (usize, usize),
        kernel: (usize, usize),
    ) -> PureResult<(usize, usize)> {
        let padded = (input.0 + 2 * self.padding.0, input.1 + 2 * self.padding.1);
        if padded.0 < kernel.0 || padded.1 < kernel.1 {
            return Err(TensorError::shapes(
                &[padded.0, padded.1],
                &[kernel.0, kernel.1],
            ));
        }
        Ok((
            (padded.0 - kernel.0) / self.stride.0 + 1,
            (padded.1 - kernel.1) / self.stride.1 + 1,
        ))
    }

    /// Output size of a transposed convolution.
    pub fn transpose_output(
        &self,
        input: (usize, usize),
        kernel: (usize, usize),
    ) -> PureResult<(usize, usize)> {
        if input.0 == 0 || input.1 == 0 {
            return Err(TensorError::EmptyInput("conv_transpose2d input"));
        }
        let full = (
            (input.0 - 1) * self.stride.0 + kernel.0,
            (input.1 - 1) * self.stride.1 + kernel.1,
        );
        let crop = (2 * self.padding.0, 2 * self.padding.1);
        if full.0 <= crop.0 || full.1 <= crop.1 {
            return Err(TensorError::shapes(&[full.0, full.1], &[crop.0, crop.1]));
        }
        Ok((full.0 - crop.0, full.1 - crop.1))
    }
}

/// Maps an output coordinate plus kernel offset onto a source coordinate.
#[inline]
fn source(out: usize, stride: usize, offset: usize, pad: usize, limit: usize) -> Option<usize> {
    let pos = (out * stride + offset) as isize - pad as isize;
    if pos < 0 || pos >= limit as isize {
        None
    } else {
        Some(pos as usize)
    }
}

#[derive(Clone, Copy, Debug)]
struct Dims {
    batch: usize,
    in_channels: usize,
    out_channels: usize,
    input: (usize, usize),
    output: (usize, usize),
    kernel: (usize, usize),
}

fn check_bias(bias: &Tensor, channels: usize) -> PureResult<()> {
    if bias.shape() != [channels] {
        return Err(TensorError::shapes(&bias.shape(), &[channels]));
    }
    Ok(())
}

/// Cross-correlation of `input` `(n, c_in, h, w)` with `weight`
/// `(c_out, c_in, kh, kw)` plus a per-channel `bias` `(c_out)`.
pub fn conv2d(
    input: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    geometry: Conv2dGeometry,
) -> PureResult<Tensor> {
    let (n, ci, h, w) = input.dims4()?;
    let (co, wci, kh, kw) = weight.dims4()?;
    if wci != ci {
        return Err(TensorError::shapes(&input.shape(), &weight.shape()));
    }
    check_bias(bias, co)?;
    let (oh, ow) = geometry.conv_output((h, w), (kh, kw))?;
    let dims = Dims {
        batch: n,
        in_channels: ci,
        out_channels: co,
        input: (h, w),
        output: (oh, ow),
        kernel: (kh, kw),
    };

    let x = input.to_vec();
    let wt = weight.to_vec();
    let bs = bias.to_vec();
    let (sh, sw) = geometry.stride;
    let (ph, pw) = geometry.padding;
    let mut out = vec![0.0f32; n * co * oh * ow];
    for b in 0..n {
        for o in 0..co {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = bs[o];
                    for c in 0..ci {
                        for i in 0..kh {
                            let Some(iy) = source(oy, sh, i, ph, h) else {
                                continue;
                            };
                            for j in 0..kw {
                                let Some(ix) = source(ox, sw, j, pw, w) else {
                                    continue;
                                };
                                acc += wt[((o * ci + c) * kh + i) * kw + j]
                                    * x[((b * ci + c) * h + iy) * w + ix];
                            }
                        }
                    }
                    out[((b * co + o) * oh + oy) * ow + ox] = acc;
                }
            }
        }
    }
    let y = array(&[n, co, oh, ow], out)?;

    struct Node {
        input: Tensor,
        weight: Tensor,
        bias: Tensor,
        geometry: Conv2dGeometry,
        dims: Dims,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "conv2d"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.input.clone(), self.weight.clone(), self.bias.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let Dims {
                batch: n,
                in_channels: ci,
                out_channels: co,
                input: (h, w),
                output: (oh, ow),
                kernel: (kh, kw),
            } = self.dims;
            let (sh, sw) = self.geometry.stride;
            let (ph, pw) = self.geometry.padding;
            let go = flat(go);
            let x = self.input.to_vec();
            let wt = self.weight.to_vec();
            let mut gx = vec![0.0f32; x.len()];
            let mut gw = vec![0.0f32; wt.len()];
            let mut gb = vec![0.0f32; co];
            for b in 0..n {
                for o in 0..co {
                    for oy in 0..oh {
                        for ox in 0..ow {
                            let g = go[((b * co + o) * oh + oy) * ow + ox];
                            gb[o] += g;
                            for c in 0..ci {
                                for i in 0..kh {
                                    let Some(iy) = source(oy, sh, i, ph, h) else {
                                        continue;
                                    };
                                    for j in 0..kw {
                                        let Some(ix) = source(ox, sw, j, pw, w) else {
                                            continue;
                                        };
                                        let wi = ((o * ci + c) * kh + i) * kw + j;
                                        let xi = ((b * ci + c) * h + iy) * w + ix;
                                        gw[wi] += g * x[xi];
                                        gx[xi] += g * wt[wi];
                                    }
                                }
                            }
                        }
                    }
                }
            }
            Ok(vec![
                Some(array(&[n, ci, h, w], gx)?),
                Some(array(&[co, ci, kh, kw], gw)?),
                Some(array(&[co], gb)?),
            ])
        }
    }
    Ok(Tensor::from_op(y, &[input, weight, bias], || Node {
        input: input.clone(),
        weight: weight.clone(),
        bias: bias.clone(),
        geometry,
        dims,
    }))
}

/// Transposed convolution of `input` `(n, c_in, h, w)` with `weight`
/// `(c_in, c_out, kh, kw)` plus a per-channel `bias` `(c_out)`. With kernel 4,
/// stride 2 and padding 1 the spatial size doubles.
pub fn conv_transpose2d(
    input: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    geometry: Conv2dGeometry,
) -> PureResult<Tensor> {
    let (n, ci, h, w) = input.dims4()?;
    let (wci, co, kh, kw) = weight.dims4()?;
    if wci != ci {
        return Err(TensorError::shapes(&input.shape(), &weight.shape()));
    }
    check_bias(bias, co)?;
    let (oh, ow) = geometry.transpose_output((h, w), (kh, kw))?;
    let dims = Dims {
        batch: n,
        in_channels: ci,
        out_channels: co,
        input: (h, w),
        output: (oh, ow),
        kernel: (kh, kw),
    };

    let x = input.to_vec();
    let wt = weight.to_vec();
    let bs = bias.to_vec();
    let (sh, sw) = geometry.stride;
    let (ph, pw) = geometry.padding;
    let mut out = vec![0.0f32; n * co * oh * ow];
    for b in 0..n {
        for o in 0..co {
            let start = (b * co + o) * oh * ow;
            out[start..start + oh * ow].fill(bs[o]);
        }
        for c in 0..ci {
            for y in 0..h {
                for xx in 0..w {
                    let v = x[((b * ci + c) * h + y) * w + xx];
                    for o in 0..co {
                        for i in 0..kh {
                            let Some(oy) = source(y, sh, i, ph, oh) else {
                                continue;
                            };
                            for j in 0..kw {
                                let Some(ox) = source(xx, sw, j, pw, ow) else {
                                    continue;
                                };
                                out[((b * co + o) * oh + oy) * ow + ox] +=
                                    v * wt[((c * co + o) * kh + i) * kw + j];
                            }
                        }
                    }
                }
            }
        }
    }
    let y = array(&[n, co, oh, ow], out)?;

    struct Node {
        input: Tensor,
        weight: Tensor,
        bias: Tensor,
        geometry: Conv2dGeometry,
        dims: Dims,
    }
    impl BackwardNode for Node {
        fn name(&self) -> &'static str {
            "conv_transpose2d"
        }
        fn parents(&self) -> Vec<Tensor> {
            vec![self.input.clone(), self.weight.clone(), self.bias.clone()]
        }
        fn backward(&self, go: &ArrayD<f32>) -> PureResult<Vec<Option<ArrayD<f32>>>> {
            let Dims {
                batch: n,
                in_channels: ci,
                out_channels: co,
                input: (h, w),
                output: (oh, ow),
                kernel: (kh, kw),
            } = self.dims;
            let (sh, sw) = self.geometry.stride;
            let (ph, pw) = self.geometry.padding;
            let go = flat(go);
            let x = self.input.to_vec();
            let wt = self.weight.to_vec();
            let mut gx = vec![0.0f32; x.len()];
            let mut gw = vec![0.0f32; wt.len()];
            let mut gb = vec![0.0f32; co];
            for b in 0..n {
                for o in 0..co {
                    let start = (b * co + o) * oh * ow;
                    gb[o] += go[start..start + oh * ow].iter().sum::<f32>();
                }
                for c in 0..ci {
                    for y in 0..h {
                        for xx in 0..w {
                            let xi = ((b * ci + c) * h + y) * w + xx;
                            let v = x[xi];
                            for o in 0..co {
                                for i in 0..kh {
                                    let Some(oy) = source(y, sh, i, ph, oh) else {
                                        continue;
                                    };
                                    for j in 0..kw {
                                        let Some(ox) = source(xx, sw, j, pw, ow) else {
                                            continue;
                                        };
                                        let g = go[((b * co + o) * oh + oy) * ow + ox];
                                        let wi = ((c * co + o) * kh + i) * kw + j;
                                        gx[xi] += g * wt[wi];
                                        gw[wi] += g * v;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            Ok(vec![
                Some(array(&[n, ci, h, w], gx)?),
                Some(array(&[ci, co, kh, kw], gw)?),
                Some(array(&[co], gb)?),
            ])
        }
    }
    Ok(Tensor::from_op(y, &[input, weight, bias], || Node {
        input: input.clone(),
        weight: weight.clone(),
        bias: bias.clone(),
        geometry,
        dims,
    }))
}
