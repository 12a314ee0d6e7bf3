use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use visitstore::chain::engine::ChainEngine;
use visitstore::core::types::TABLE_SIZE;
use visitstore::parallel::loader::BulkLoader;
use visitstore::parallel::parser::parse_line;
use visitstore::storage::hash_index::HashIndex;
use visitstore::storage::rebuild::rebuild_index;
use visitstore::storage::record_store::RecordStore;
use visitstore::{Config, ErrorKind, Record};
use uuid::Uuid;

const HEADER: &str = "fecha,dni,nombre,apellido,edad,medico,motivo,examenes,resultados,receta";

fn line(id: i32, n: usize) -> String {
    format!(
        "2021-05-{:02},{},Nombre{},Apellido{},{},Dr. Campos,Motivo {},Examen,Ok,Receta {}, con comas",
        1 + n % 28,
        id,
        n,
        n,
        20 + n % 60,
        n,
        n
    )
}

/// Writes `files` input files, returning their data lines file by file.
fn write_inputs(dir: &Path, files: usize, per_file: usize) -> Vec<Vec<String>> {
    let mut all = Vec::new();
    for f in 0..files {
        let lines: Vec<String> = (0..per_file)
            .map(|i| {
                let n = f * per_file + i;
                // a handful of identifiers, several sharing a bucket
                let id = [10, 10 + TABLE_SIZE as i32, 11, 12, 900_001][n % 5];
                line(id, n)
            })
            .collect();
        let body = format!("{}\n{}\n", HEADER, lines.join("\n"));
        fs::write(dir.join(format!("part_{}.csv", f)), body).unwrap();
        all.push(lines);
    }
    all
}

fn records_for(engine: &mut ChainEngine, id: i32) -> Vec<Record> {
    engine
        .search(id)
        .unwrap()
        .records()
        .map(|r| Record { next: None, ..r.clone() })
        .collect()
}

#[test]
fn two_workers_match_sequential_inserts() {
    let input = TempDir::new().unwrap();
    let per_file = write_inputs(input.path(), 3, 40);

    let loaded = TempDir::new().unwrap();
    let cfg = Config::default().with_data_dir(loaded.path()).with_workers(2);
    let report = BulkLoader::new(&cfg).unwrap().run(input.path()).unwrap();

    assert_eq!(report.workers, 2);
    assert_eq!(report.files, 3);
    assert_eq!(report.records, 120);
    assert_eq!(report.store_records, 120);
    assert_eq!(report.malformed_lines, 0);
    assert_eq!(report.shards[0].files, 2);
    assert_eq!(report.shards[1].files, 1);

    // rank 0 owns part_0 and part_2, rank 1 owns part_1; merge goes by rank
    let inserted = TempDir::new().unwrap();
    let seq_cfg = Config::default().with_data_dir(inserted.path());
    let mut sequential = ChainEngine::open(&seq_cfg).unwrap();
    for file in [0, 2, 1] {
        for l in &per_file[file] {
            sequential.insert(parse_line(l).unwrap()).unwrap();
        }
    }

    let mut bulk = ChainEngine::open_existing(&cfg).unwrap();
    for id in [10, 10 + TABLE_SIZE as i32, 11, 12, 900_001, 13] {
        assert_eq!(records_for(&mut bulk, id), records_for(&mut sequential, id));
    }
    assert_eq!(bulk.record_count(), 120);

    let leftovers: Vec<PathBuf> = fs::read_dir(loaded.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    assert!(leftovers.is_empty(), "work dir left behind: {:?}", leftovers);
}

#[test]
fn malformed_lines_and_unreadable_files_are_skipped() {
    let input = TempDir::new().unwrap();
    let good = input.path().join("good.csv");
    let body = format!(
        "{}\n{}\n\nnot,a,record\n2021-01-01,xyz,A,B,1,P,R,T,Res,Rx\n{}\n",
        HEADER,
        line(55, 0),
        line(55, 1)
    );
    fs::write(&good, body).unwrap();
    let missing = input.path().join("missing.csv");

    let out = TempDir::new().unwrap();
    let cfg = Config::default().with_data_dir(out.path()).with_workers(2);
    let report = BulkLoader::new(&cfg)
        .unwrap()
        .run_files(vec![good, missing])
        .unwrap();

    assert_eq!(report.records, 2);
    assert_eq!(report.malformed_lines, 2);
    assert_eq!(report.files_skipped, 1);

    let mut engine = ChainEngine::open_existing(&cfg).unwrap();
    let names: Vec<String> = engine
        .search(55)
        .unwrap()
        .records()
        .map(|r| r.first_name.clone())
        .collect();
    assert_eq!(names, vec!["Nombre1", "Nombre0"]);
}

#[test]
fn loading_on_top_of_an_existing_store_keeps_old_records() {
    let input = TempDir::new().unwrap();
    fs::write(
        input.path().join("a.csv"),
        format!("{}\n{}\n", HEADER, line(70, 1)),
    )
    .unwrap();

    let out = TempDir::new().unwrap();
    let cfg = Config::default().with_data_dir(out.path()).with_workers(1);
    {
        let mut engine = ChainEngine::open(&cfg).unwrap();
        engine.insert(parse_line(&line(70, 0)).unwrap()).unwrap();
    }

    BulkLoader::new(&cfg).unwrap().run(input.path()).unwrap();

    let mut engine = ChainEngine::open_existing(&cfg).unwrap();
    let names: Vec<String> = engine
        .search(70)
        .unwrap()
        .records()
        .map(|r| r.first_name.clone())
        .collect();
    assert_eq!(names, vec!["Nombre1", "Nombre0"]);
}

#[test]
fn rebuild_reproduces_insert_order() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::default().with_data_dir(dir.path()).with_file_lock(false);
    let expected = {
        let mut engine = ChainEngine::open(&cfg).unwrap();
        for n in 0..30 {
            engine.insert(parse_line(&line(300 + (n % 3) as i32, n)).unwrap()).unwrap();
        }
        engine.sync().unwrap();
        (300..303).map(|id| records_for(&mut engine, id)).collect::<Vec<_>>()
    };

    let index_path = dir.path().join(&cfg.index_file);
    let mut store = RecordStore::open(&dir.path().join(&cfg.store_file)).unwrap();
    let mut index = HashIndex::create(&index_path, TABLE_SIZE).unwrap();
    assert_eq!(rebuild_index(&mut store, &mut index).unwrap(), 30);
    drop(store);
    drop(index);

    let mut engine = ChainEngine::open_existing(&cfg).unwrap();
    let rebuilt: Vec<_> = (300..303).map(|id| records_for(&mut engine, id)).collect();
    assert_eq!(rebuilt, expected);
}

#[test]
fn latin1_input_loads_every_line() {
    let input = TempDir::new().unwrap();
    let mut body = format!("{}\n{}\n", HEADER, line(55, 0)).into_bytes();
    body.extend_from_slice(b"2021-05-02,56,Jos\xe9,Pe\xf1a,40,Dr. Campos,Motivo,Examen,Ok,Receta\n");
    body.extend_from_slice(format!("{}\n", line(57, 2)).as_bytes());
    fs::write(input.path().join("latin1.csv"), body).unwrap();

    let out = TempDir::new().unwrap();
    let cfg = Config::default().with_data_dir(out.path()).with_workers(1);
    let report = BulkLoader::new(&cfg).unwrap().run(input.path()).unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(report.malformed_lines, 0);
    assert_eq!(report.files_skipped, 0);

    let mut engine = ChainEngine::open_existing(&cfg).unwrap();
    for id in [55, 56, 57] {
        assert_eq!(records_for(&mut engine, id).len(), 1, "identifier {}", id);
    }
}

#[test]
fn failed_shard_aborts_and_leaves_the_store_alone() {
    let input = TempDir::new().unwrap();
    write_inputs(input.path(), 2, 10);

    let out = TempDir::new().unwrap();
    let cfg = Config::default().with_data_dir(out.path()).with_workers(2);
    {
        let mut engine = ChainEngine::open(&cfg).unwrap();
        engine.insert(parse_line(&line(70, 0)).unwrap()).unwrap();
        engine.sync().unwrap();
    }
    let store_path = out.path().join(&cfg.store_file);
    let index_path = out.path().join(&cfg.index_file);
    let store_before = fs::read(&store_path).unwrap();
    let index_before = fs::read(&index_path).unwrap();

    // rank 1 cannot create its shard when a directory sits at that path
    let job = Uuid::new_v4();
    let work_dir = out.path().join(format!("load-{}", job));
    fs::create_dir_all(work_dir.join("temp_rank_1.dat")).unwrap();

    let err = BulkLoader::new(&cfg)
        .unwrap()
        .with_job_id(job)
        .run(input.path())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DistributedAbort);

    assert_eq!(fs::read(&store_path).unwrap(), store_before);
    assert_eq!(fs::read(&index_path).unwrap(), index_before);
    let leftovers: Vec<PathBuf> = fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("load-"))
        .collect();
    assert!(leftovers.is_empty(), "work dir left behind: {:?}", leftovers);

    let mut engine = ChainEngine::open_existing(&cfg).unwrap();
    assert_eq!(records_for(&mut engine, 70).len(), 1);
    assert!(records_for(&mut engine, 10).is_empty());
}
