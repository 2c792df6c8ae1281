use anyhow::{ensure, Result};

use crate::basis::BasisProvider;
use crate::findpts::Location;
use crate::mesh::Mesh;
use crate::tensor::TensorWeights;

/// Interpolates nodal fields at reference coordinates.
///
/// A field has one value per mesh node, laid out exactly like one of the mesh coordinate arrays.
pub struct FieldEvaluator<'a, const D: usize> {
    mesh: &'a Mesh<D>,
    basis: &'a dyn BasisProvider,
}

impl<'a, const D: usize> FieldEvaluator<'a, D> {
    pub fn new(mesh: &'a Mesh<D>, basis: &'a dyn BasisProvider) -> Self {
        Self { mesh, basis }
    }

    fn check_len(&self, field: &[f64]) -> Result<()> {
        let expected = self.mesh.coords(0).len();
        ensure!(
            field.len() == expected,
            "The field has {} values but the mesh has {} nodes.",
            field.len(),
            expected
        );
        Ok(())
    }

    fn element_values<'f>(&self, field: &'f [f64], element: usize) -> Result<&'f [f64]> {
        ensure!(
            element < self.mesh.element_count(),
            "Element {} is out of range, the mesh has {} elements.",
            element,
            self.mesh.element_count()
        );
        let nodes = self.mesh.nodes_per_element();
        Ok(&field[element * nodes..(element + 1) * nodes])
    }

    /// Interpolates `field` at reference coordinates `r` of `element`.
    pub fn evaluate(&self, field: &[f64], element: usize, r: &[f64; D]) -> Result<f64> {
        self.check_len(field)?;
        let values = self.element_values(field, element)?;
        let mut weights = TensorWeights::new(self.mesh.nodes_per_axis());
        weights.set(self.basis, 0, r);
        Ok(weights.value(values))
    }

    /// Interpolates `field` at every located point, [`None`] for points not found.
    pub fn evaluate_many(
        &self,
        field: &[f64],
        locations: &[Location<D>],
    ) -> Result<Vec<Option<f64>>> {
        self.check_len(field)?;
        let mut weights = TensorWeights::new(self.mesh.nodes_per_axis());
        locations
            .iter()
            .map(|location| match location.element {
                None => Ok(None),
                Some(e) => {
                    let values = self.element_values(field, e)?;
                    weights.set(self.basis, 0, &location.r);
                    Ok(Some(weights.value(values)))
                }
            })
            .collect()
    }
}
