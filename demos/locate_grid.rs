use findpts::{Code, FindPoints, FindPtsConfig, Mesh, PointLocator};
use rand::prelude::*;

fn main() -> anyhow::Result<()> {
    let (lo, hi) = ([0., 0.], [10., 10.]);
    let n = 50;

    // Slightly wavy grid, 7 nodes per axis
    let grid = Mesh::grid(lo, hi, [n, n], [7, 7])?;
    let [x, y] = [0, 1].map(|c| grid.coords(c).to_vec());
    let wavy: Vec<f64> = x
        .iter()
        .zip(&y)
        .map(|(x, y)| x + 0.05 * (y * 0.7).sin())
        .collect();
    let mesh = Mesh::new([7, 7], [wavy, y])?;

    let field: Vec<f64> = (0..mesh.coords(0).len())
        .map(|i| (mesh.coords(0)[i] * 0.3).cos() * mesh.coords(1)[i])
        .collect();
    let findpts = FindPoints::new(mesh, FindPtsConfig::default())?;

    let mut rng = rand::thread_rng();
    let query: Vec<_> = (0..420_000)
        .map(|_| [rng.gen::<f64>() * hi[0], rng.gen::<f64>() * hi[1]])
        .collect();

    let locations = findpts.par_locate_many(&query);
    let values = findpts.evaluate_many(&field, &locations)?;

    let internal = locations.iter().filter(|l| l.code == Code::Internal).count();
    let border = locations.iter().filter(|l| l.code == Code::Border).count();
    let max_error = query
        .iter()
        .zip(&values)
        .filter_map(|(x, v)| v.map(|v| (v - (x[0] * 0.3).cos() * x[1]).abs()))
        .fold(0., f64::max);
    println!(
        "{} points: {} internal, {} on the border, {} not found, max interpolation error {:e}",
        query.len(),
        internal,
        border,
        query.len() - internal - border,
        max_error
    );

    Ok(())
}
