// Type aliases for data values.
pub type Vertex3 = [f64; 3];
pub type Triangle3 = [Vertex3; 3];
pub type Tetrahedron3 = [Vertex3; 4];

// Type aliases for data indices.
pub type VertexIdx = usize;
/// Index of a triangle in the (simplified) input soup, used for surface tags.
pub type TriIdx = usize;
pub type TetIdx = usize;
