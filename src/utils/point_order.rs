use super::types::Vertex3;

/// Grid resolution per axis; three axes fill a 30-bit key.
const ORDER: u32 = 10;

/// Sorts vertex indices along a 3D Hilbert curve.
///
/// Inserting points in this order keeps consecutive insertions spatially
/// close, which keeps the visibility walks of the incremental
/// tetrahedralization short. Points are quantized onto a `2^10` grid over
/// their bounding box and keyed by Skilling's transpose construction of the
/// Hilbert index; the key sort replaces any recursive curve subdivision.
pub fn sort_along_hilbert_curve_3d(vertices: &[Vertex3], indices_to_add: &[usize]) -> Vec<usize> {
    if indices_to_add.is_empty() {
        return Vec::new();
    }

    let mut lo = vertices[indices_to_add[0]];
    let mut hi = lo;
    for &i in indices_to_add {
        for d in 0..3 {
            lo[d] = lo[d].min(vertices[i][d]);
            hi[d] = hi[d].max(vertices[i][d]);
        }
    }

    let side = (1u32 << ORDER) - 1;
    let quantize = |value: f64, lo: f64, hi: f64| -> u32 {
        if hi <= lo {
            return 0;
        }
        let t = (value - lo) / (hi - lo);
        ((t * side as f64).round() as u32).min(side)
    };

    let mut keyed: Vec<(u64, usize)> = indices_to_add
        .iter()
        .map(|&i| {
            let p = vertices[i];
            let cell = [
                quantize(p[0], lo[0], hi[0]),
                quantize(p[1], lo[1], hi[1]),
                quantize(p[2], lo[2], hi[2]),
            ];
            (hilbert_key(cell), i)
        })
        .collect();
    keyed.sort_by_key(|&(key, _)| key);

    keyed.into_iter().map(|(_, i)| i).collect()
}

/// Hilbert index of a grid cell: Skilling's axes-to-transpose walk, followed
/// by interleaving the transposed axis words most significant plane first.
fn hilbert_key(mut x: [u32; 3]) -> u64 {
    let top = 1u32 << (ORDER - 1);

    // undo the excess rotations, top plane downward
    let mut q = top;
    while q > 1 {
        let mask = q - 1;
        for i in 0..3 {
            if x[i] & q != 0 {
                x[0] ^= mask;
            } else {
                let t = (x[0] ^ x[i]) & mask;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode
    x[1] ^= x[0];
    x[2] ^= x[1];

    let mut t = 0;
    let mut q = top;
    while q > 1 {
        if x[2] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for axis in x.iter_mut() {
        *axis ^= t;
    }

    let mut key = 0u64;
    for bit in (0..ORDER).rev() {
        for axis in x {
            key = (key << 1) | u64::from((axis >> bit) & 1);
        }
    }
    key
}
