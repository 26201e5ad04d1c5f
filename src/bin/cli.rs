/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Local driver for the region vector index: generates synthetic regions in
//! an in-memory engine, bootstraps their indexes and exercises search, scrub
//! and metrics.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use proxima_vindex::core::{IndexParameter, MemoryRegionMeta, RegionInfo, VectorIndexConfig, VectorWithId, WalMutation};
use proxima_vindex::query::{FieldCondition, FilterExpr, FilterMode, SearchParameter};
use proxima_vindex::storage::{LocalSnapshotStore, MemoryEngine, MemoryLogStorage};
use proxima_vindex::{BuiltinIndexFactory, MetricType, VectorIndexManager};

#[derive(Parser)]
#[command(name = "vindex-cli")]
#[command(about = "Region vector index lifecycle and query driver")]
struct Cli {
    /// TOML configuration file; defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    dataset: DatasetArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DatasetArgs {
    #[arg(long, default_value_t = 4)]
    regions: u64,

    #[arg(long, default_value_t = 10_000)]
    vectors_per_region: u64,

    #[arg(short, long, default_value_t = 32)]
    dimension: usize,

    #[arg(long, value_enum, default_value_t = IndexKind::Flat)]
    index: IndexKind,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Overrides `snapshot.dir` from the configuration
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexKind {
    Flat,
    Ivf,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Ann,
    Ids,
    ScalarPre,
    ScalarPost,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Load or build every region index
    Bootstrap {
        #[arg(long)]
        concurrency: Option<usize>,
        /// Save a snapshot of every region afterwards
        #[arg(long)]
        save: bool,
    },
    /// Run random queries against one region
    Search {
        #[arg(long, default_value_t = 1)]
        region: u64,
        #[arg(short = 'k', long, default_value_t = 10)]
        top_n: usize,
        #[arg(long, default_value_t = 8)]
        queries: usize,
        #[arg(long, value_enum, default_value_t = StrategyArg::Ann)]
        strategy: StrategyArg,
    },
    /// Delete a share of vectors, then run one scrub pass
    Scrub {
        #[arg(long, default_value_t = 0.2)]
        delete_ratio: f64,
    },
    /// Print region metrics as JSON
    Metrics,
}

struct Cluster {
    manager: Arc<VectorIndexManager>,
    engine: Arc<MemoryEngine>,
    log: Arc<MemoryLogStorage>,
    regions: Vec<Arc<RegionInfo>>,
    next_log_id: u64,
}

impl Cluster {
    fn generate(config: VectorIndexConfig, args: &DatasetArgs) -> anyhow::Result<Self> {
        if args.dimension == 0 || args.vectors_per_region == 0 {
            bail!("dimension and vectors per region must be greater than zero");
        }
        let parameter = match args.index {
            IndexKind::Flat => IndexParameter::Flat {
                dimension: args.dimension,
                metric: MetricType::L2,
            },
            IndexKind::Ivf => IndexParameter::IvfFlat {
                dimension: args.dimension,
                metric: MetricType::L2,
                nlist: 16,
                nprobe: 4,
            },
        };

        let engine = Arc::new(MemoryEngine::new());
        let log = Arc::new(MemoryLogStorage::new());
        let meta = Arc::new(MemoryRegionMeta::new());
        let snapshots = Arc::new(LocalSnapshotStore::new(config.snapshot.dir.clone()));
        let mut rng = StdRng::seed_from_u64(args.seed);
        let mut regions = Vec::new();

        let started = Instant::now();
        for region_id in 1..=args.regions {
            let start = (region_id - 1) * args.vectors_per_region;
            let region = meta.upsert(RegionInfo::for_id_range(
                region_id,
                1,
                start,
                start + args.vectors_per_region,
                Some(parameter.clone()),
            ));
            let vectors = (start..start + args.vectors_per_region)
                .map(|id| {
                    let values = (0..args.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
                    VectorWithId::new(id, values)
                        .with_scalar([("bucket".to_string(), json!(id % 10))].into_iter().collect())
                        .with_table([("score".to_string(), json!(rng.gen_range(0..100)))].into_iter().collect())
                })
                .collect();
            let mutation = WalMutation::Upsert(vectors);
            engine.apply(&region, 1, &mutation)?;
            log.append(region_id, 1, &mutation)?;
            regions.push(region);
        }
        info!(
            "📦 Generated {} regions x {} vectors ({}D) in {:?}",
            args.regions,
            args.vectors_per_region,
            args.dimension,
            started.elapsed()
        );

        let manager = VectorIndexManager::new(
            config,
            engine.clone(),
            log.clone(),
            snapshots,
            Arc::new(BuiltinIndexFactory),
            meta,
        )?;
        Ok(Self {
            manager: Arc::new(manager),
            engine,
            log,
            regions,
            next_log_id: 2,
        })
    }

    fn delete(&mut self, ratio: f64, rng: &mut StdRng) -> anyhow::Result<usize> {
        let mut deleted = 0;
        for region in &self.regions {
            let (min, max) = region.id_range();
            let ids: Vec<u64> = (min..max).filter(|_| rng.gen_bool(ratio.clamp(0.0, 1.0))).collect();
            deleted += ids.len();
            let mutation = WalMutation::Delete(ids);
            self.engine.apply(region, self.next_log_id, &mutation)?;
            self.log.append(region.id, self.next_log_id, &mutation)?;
            self.manager.apply(region.id, self.next_log_id, &mutation)?;
        }
        self.next_log_id += 1;
        Ok(deleted)
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<VectorIndexConfig> {
    match path {
        Some(path) => VectorIndexConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(VectorIndexConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(dir) = &cli.dataset.snapshot_dir {
        config.snapshot.dir = dir.clone();
    }

    let mut cluster = Cluster::generate(config, &cli.dataset)?;

    match cli.command {
        Commands::Bootstrap { concurrency, save } => {
            let concurrency = concurrency.unwrap_or(cluster.manager.config().bootstrap.concurrency);
            let started = Instant::now();
            cluster
                .manager
                .parallel_load_or_build(cluster.regions.clone(), concurrency)
                .await?;
            println!(
                "Bootstrapped {} regions in {:?} (peak concurrent tasks: {})",
                cluster.regions.len(),
                started.elapsed(),
                cluster.manager.running_counts().peak_tasks
            );
            if save {
                for region in &cluster.regions {
                    let meta = cluster.manager.save_vector_index(region.id).await?;
                    println!("Region {} saved as {} at log id {}", region.id, meta.snapshot_id, meta.log_id);
                }
            }
        }
        Commands::Search {
            region,
            top_n,
            queries,
            strategy,
        } => {
            cluster.manager.load_or_build_vector_index(region).await?;
            let reader = cluster.manager.reader(region).await?;
            let (min, max) = reader.region().id_range();

            let mut rng = StdRng::seed_from_u64(cli.dataset.seed.wrapping_add(1));
            let query_vectors: Vec<Vec<f32>> = (0..queries)
                .map(|_| (0..cli.dataset.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
                .collect();

            let param = match strategy {
                StrategyArg::Ann => SearchParameter::top_n(top_n),
                StrategyArg::Ids => {
                    let ids = (0..top_n * 4).map(|_| rng.gen_range(min..max)).collect();
                    SearchParameter::top_n(top_n).with_vector_ids(ids)
                }
                StrategyArg::ScalarPre => {
                    SearchParameter::top_n(top_n).with_scalar_filter(FilterExpr::equals("bucket", 3), FilterMode::Pre)
                }
                StrategyArg::ScalarPost => {
                    SearchParameter::top_n(top_n).with_scalar_filter(FilterExpr::equals("bucket", 3), FilterMode::Post)
                }
                StrategyArg::Table => SearchParameter::top_n(top_n)
                    .with_table_filter(FilterExpr::field("score", FieldCondition::GreaterThanOrEqual(json!(90)))),
            };

            let result = reader.batch_search(&query_vectors, &param).await?;
            for (i, hits) in result.results.iter().enumerate() {
                let ids: Vec<_> = hits.iter().map(|h| format!("{}:{:.4}", h.id(), h.distance)).collect();
                println!("query {}: {}", i, ids.join(" "));
            }
            println!("{}", serde_json::to_string_pretty(&result.timing)?);
        }
        Commands::Scrub { delete_ratio } => {
            cluster.manager.init().await?;
            let mut rng = StdRng::seed_from_u64(cli.dataset.seed.wrapping_add(2));
            let deleted = cluster.delete(delete_ratio, &mut rng)?;
            println!("Deleted {} vectors", deleted);

            let decisions = cluster.manager.scrub_vector_index().await;
            println!("{}", serde_json::to_string_pretty(&decisions)?);
        }
        Commands::Metrics => {
            cluster.manager.init().await?;
            let mut metrics = Vec::new();
            for region in &cluster.regions {
                metrics.push(cluster.manager.reader(region.id).await?.get_region_metrics().await?);
            }
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }
    Ok(())
}
