//! Inspect navmesh set files and rebuild their static pathing data.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use navlink::{
    NAVMESH_SET_VERSION, NavMesh, NavMeshSetCodec, NavMeshType, StaticPathingParams,
    TraverseLinkConfigBuilder, create_static_pathing_data,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a summary of a navmesh set file
    Info {
        /// Navmesh set file to read
        #[clap(value_parser)]
        input: PathBuf,

        /// Set version the file was written with
        #[clap(long, value_parser, default_value_t = NAVMESH_SET_VERSION)]
        version: u32,
    },

    /// Recompute poly groups and traverse tables from the links stored in a set file
    RebuildTables {
        /// Navmesh set file to read
        #[clap(value_parser)]
        input: PathBuf,

        /// Where to write the rebuilt set
        #[clap(short, long, value_parser)]
        output: PathBuf,

        /// Hull size class of the mesh
        #[clap(long, value_enum, default_value_t = MeshClass::Small)]
        nav_mesh_type: MeshClass,

        /// Merge poly groups joined by any traverse link
        #[clap(long)]
        collapse: bool,

        /// JSON file with traverse link settings; unset fields keep their defaults
        #[clap(long, value_parser)]
        config: Option<PathBuf>,

        /// Set version to read and write
        #[clap(long, value_parser, default_value_t = NAVMESH_SET_VERSION)]
        version: u32,
    },
}

/// The navmesh size classes, named as in navmesh file names.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "snake_case")]
enum MeshClass {
    Small,
    MedShort,
    Medium,
    Large,
    ExtraLarge,
}

impl From<MeshClass> for NavMeshType {
    fn from(class: MeshClass) -> Self {
        match class {
            MeshClass::Small => Self::Small,
            MeshClass::MedShort => Self::MedShort,
            MeshClass::Medium => Self::Medium,
            MeshClass::Large => Self::Large,
            MeshClass::ExtraLarge => Self::ExtraLarge,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("navlink=info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Info { input, version } => {
            let mesh = NavMeshSetCodec::new(version)
                .load(&input)
                .with_context(|| format!("Failed to load navmesh set: {}", input.display()))?;
            print_info(&mesh);
        }
        Commands::RebuildTables {
            input,
            output,
            nav_mesh_type,
            collapse,
            config,
            version,
        } => {
            let mut builder = match config {
                Some(path) => {
                    let json = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read config: {}", path.display()))?;
                    serde_json::from_str::<TraverseLinkConfigBuilder>(&json)
                        .with_context(|| format!("Failed to parse config: {}", path.display()))?
                }
                None => TraverseLinkConfigBuilder::default(),
            };
            builder.nav_mesh_type = nav_mesh_type.into();
            builder.set_version = version;
            builder.collapse_linked_poly_groups |= collapse;
            let config = builder.build();

            let codec = NavMeshSetCodec::new(version);
            let mut mesh = codec
                .load(&input)
                .with_context(|| format!("Failed to load navmesh set: {}", input.display()))?;

            create_static_pathing_data(&mut mesh, &StaticPathingParams::from(&config))
                .context("Failed to build static pathing data")?;

            codec
                .save(&output, &mesh)
                .with_context(|| format!("Failed to write navmesh set: {}", output.display()))?;

            tracing::info!(
                "Wrote {} with {} poly groups and {} traverse tables",
                output.display(),
                mesh.params().poly_group_count,
                mesh.traverse_tables().len()
            );
        }
    }

    Ok(())
}

fn print_info(mesh: &NavMesh) {
    let params = mesh.params();
    println!("Origin:          {}", params.origin);
    println!("Tile size:       {} x {}", params.tile_width, params.tile_height);
    println!("Tiles:           {} / {}", mesh.tile_count(), params.max_tiles);
    println!("Max polys/tile:  {}", params.max_polys);

    let mut poly_count = 0;
    let mut traverse_link_count = 0;
    for (tile_ref, data) in mesh.tiles() {
        let links: usize = data.polys.iter().map(|poly| poly.traverse_links().count()).sum();
        println!(
            "  tile {:#x} ({}, {}, {}): {} polys, {} links, {} traverse links",
            tile_ref.0,
            data.header.x,
            data.header.y,
            data.header.layer,
            data.polys.len(),
            data.link_count(),
            links
        );
        poly_count += data.polys.len();
        traverse_link_count += links;
    }
    println!("Polys:           {poly_count}");
    println!("Traverse links:  {traverse_link_count}");
    println!("Poly groups:     {}", params.poly_group_count);

    let tables = mesh.traverse_tables();
    println!(
        "Traverse tables: {} x {} bytes",
        tables.len(),
        params.traverse_table_size
    );
    for (index, table) in tables.iter().enumerate() {
        let words = table.words();
        let set_bits: u32 = words.iter().map(|word| word.count_ones()).sum();
        println!("  table {index}: {set_bits} reachable group pairs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_classes_parse_by_file_name() {
        for ty in NavMeshType::ALL {
            let class = MeshClass::from_str(ty.name(), false).unwrap();
            assert_eq!(NavMeshType::from(class), ty);
        }
    }

    #[test]
    fn rebuild_tables_arguments() {
        let args = Args::try_parse_from([
            "navlink",
            "rebuild-tables",
            "in.nm",
            "--output",
            "out.nm",
            "--nav-mesh-type",
            "extra_large",
        ])
        .unwrap();
        let Commands::RebuildTables { nav_mesh_type, .. } = args.command else {
            panic!("expected rebuild-tables");
        };
        assert_eq!(nav_mesh_type, MeshClass::ExtraLarge);
        let unknown = Args::try_parse_from([
            "navlink",
            "rebuild-tables",
            "in.nm",
            "-o",
            "out.nm",
            "--nav-mesh-type",
            "huge",
        ]);
        assert!(unknown.is_err());
    }
}
