//! `generator`: builds a terrain path graph from an OFF mesh and exports its
//! largest connected component as a PATH text file and/or a BMP color graph.

use std::path::PathBuf;

use anyhow::{bail, Context};
use argh::FromArgs;

/// Build a path graph from an OFF mesh and export its largest component.
#[derive(FromArgs)]
struct Args {
    /// path to the input OFF mesh
    #[argh(positional)]
    input: PathBuf,

    /// octree subdivision depth (clamped to 15)
    #[argh(positional)]
    layer: u8,

    /// write a PATHGRAPH text file to this path
    #[argh(option, short = 'p')]
    path_output: Option<PathBuf>,

    /// write a 24-bit BMP color graph to this path
    #[argh(option, short = 'b')]
    bitmap_output: Option<PathBuf>,

    /// rotate exported positions via the PCA-ish transform
    #[argh(switch, short = 'r')]
    rotate: bool,
}

fn main() {
    env_logger::init();
    let args: Args = argh::from_env();
    if let Err(err) = run(args) {
        eprintln!("{err:#}");
        std::process::exit(-1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    log::info!("Parsing {}", args.input.display());
    let text = std::fs::read_to_string(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let mesh = navoctree_vox::load_off(&text).context("parsing OFF mesh")?;

    let mut graph = navoctree_search::PathGraph::new_pooled(1.0, 0.0, 1, 1 << 20).context("reserving octree arena")?;
    for &triangle in &mesh.triangles {
        let (p1, p2, p3) = mesh.triangle_positions(triangle);
        graph.add_terrain_triangle_mesh(p1, p2, p3, args.layer, false);
    }
    graph.build_terrain();

    let component_count = graph.get_component_total_count() as u32;
    println!("Total component count = {}", component_count);

    let mut max_size = 0usize;
    let mut max_index = 0u32;
    for i in 1..=component_count {
        let size = graph.get_component_size(i);
        println!("Component {} has size {}", i, size);
        let (positions, edges) = graph.get_component_graph(i, args.rotate);
        println!("Vertex = {} Edge = {}", positions.len(), edges.len());
        if positions.len() > max_size {
            max_size = positions.len();
            max_index = i;
        }
    }

    if max_index == 0 {
        bail!("Cannot find valid component");
    }

    let (positions, edges) = graph.get_component_graph(max_index, args.rotate);

    if let Some(path_output) = &args.path_output {
        let mut text = String::new();
        text.push_str("PATHGRAPH\n");
        text.push_str(&format!("{} {}\n", positions.len(), edges.len()));
        for p in &positions {
            text.push_str(&format!("{} {} {}\n", p.x, p.y, p.z));
        }
        for (a, b) in &edges {
            text.push_str(&format!("{} {}\n", a, b));
        }
        std::fs::write(path_output, text).with_context(|| format!("writing {}", path_output.display()))?;
    }

    if let Some(bitmap_output) = &args.bitmap_output {
        let color_graph = graph.get_component_color_graph(max_index, args.layer);
        let mut file = std::fs::File::create(bitmap_output).with_context(|| format!("creating {}", bitmap_output.display()))?;
        navoctree_image::write_bmp(&color_graph, &mut file).context("writing BMP")?;
    }

    Ok(())
}
