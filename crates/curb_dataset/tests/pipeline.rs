//! End-to-end checks for the annotation store, transforms and providers.

use curb_dataset::{
    holdout, AnnotationStore, DatasetConfig, DatasetError, EvaluationProvider, GeometricTransform,
    InferenceProvider, Label, Normalizer, Prefetcher, SampleProvider, Scene, Split, StoreItem,
    TrainingProvider,
};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;

struct Obj<'a> {
    name: &'a str,
    scene: &'a str,
    difficult: bool,
    /// xmin, ymin, xmax, ymax as written in the record (1-based).
    edges: [u32; 4],
}

fn write_record(root: &Path, id: &str, objects: &[Obj]) -> anyhow::Result<()> {
    let mut xml = format!("<annotation>\n  <filename>{id}.jpg</filename>\n");
    for o in objects {
        xml.push_str(&format!(
            "  <object>\n    <name>{}</name>\n    <type>{}</type>\n    <difficult>{}</difficult>\n    <bndbox><xmin>{}</xmin><ymin>{}</ymin><xmax>{}</xmax><ymax>{}</ymax></bndbox>\n  </object>\n",
            o.name, o.scene, o.difficult as u8, o.edges[0], o.edges[1], o.edges[2], o.edges[3]
        ));
    }
    xml.push_str("</annotation>\n");
    let dir = root.join("Annotations");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(format!("{id}.xml")), xml)?;
    Ok(())
}

fn write_image(root: &Path, id: &str, width: u32, height: u32) -> anyhow::Result<()> {
    let dir = root.join("JPEGImages");
    fs::create_dir_all(&dir)?;
    let img = RgbImage::from_fn(width, height, |x, _| Rgb([(x % 256) as u8, 90, 180]));
    img.save(dir.join(format!("{id}.jpg")))?;
    Ok(())
}

fn write_split(root: &Path, split: &str, ids: &[&str]) -> anyhow::Result<()> {
    let dir = root.join("ImageSets/Main");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(format!("{split}.txt")), ids.join("\n") + "\n")?;
    Ok(())
}

/// Image A: one curb box at rows/cols 10..50 (0-based), scene intersection. Image B: empty.
fn two_image_corpus(root: &Path) -> anyhow::Result<()> {
    write_record(
        root,
        "a",
        &[Obj {
            name: "curb",
            scene: "intersection",
            difficult: false,
            edges: [11, 11, 51, 51],
        }],
    )?;
    write_record(root, "b", &[])?;
    write_image(root, "a", 100, 100)?;
    write_image(root, "b", 80, 60)?;
    write_split(root, "train", &["a", "b"])?;
    Ok(())
}

#[test]
fn two_image_split_yields_resized_and_empty_examples() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    two_image_corpus(tmp.path())?;

    let store = AnnotationStore::open(tmp.path(), Split::Train, false)?;
    let provider = TrainingProvider::new(
        store,
        GeometricTransform::builder().flip_horizontal_prob(0.0).build(),
        Normalizer::default(),
    );
    assert_eq!(provider.len(), 2);

    let a = provider.get(0)?;
    assert_eq!(a.image.dim(), (3, 224, 224));
    assert!(a.image.is_standard_layout());
    assert_eq!(a.labels, vec![Label::Curb]);
    assert_eq!(a.scene, vec![Scene::Intersection]);
    let expected = [22.4, 22.4, 112.0, 112.0];
    for (got, want) in a.boxes[0].iter().zip(expected) {
        assert!((got - want).abs() < 1e-3, "{got} vs {want}");
    }
    assert!((a.scale - 2.24).abs() < 1e-6);

    let b = provider.get(1)?;
    assert!(b.boxes.is_empty());
    assert!(b.labels.is_empty());
    assert!(b.scene.is_empty());
    assert!((b.scale - 224.0 / 60.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn difficult_objects_filtered_unless_enabled() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_record(
        root,
        "c",
        &[
            Obj { name: "curb", scene: "obstacle", difficult: true, edges: [1, 1, 5, 5] },
            Obj { name: "curb", scene: "continuously_visible", difficult: false, edges: [2, 2, 9, 9] },
            Obj { name: "Curb", scene: "Intersection", difficult: false, edges: [3, 3, 7, 7] },
        ],
    )?;
    write_image(root, "c", 16, 16)?;
    write_split(root, "test", &["c"])?;

    let filtered = AnnotationStore::open(root, Split::Test, false)?.example(0)?;
    assert_eq!(filtered.len(), 2);
    assert_eq!(filtered.difficult, vec![false, false]);
    assert_eq!(filtered.labels.len(), filtered.scene.len());
    assert_eq!(filtered.boxes[0], [1.0, 1.0, 8.0, 8.0]);

    let all = AnnotationStore::open(root, Split::Test, true)?.example(0)?;
    assert_eq!(all.len(), 3);
    assert_eq!(all.difficult, vec![true, false, false]);
    assert_eq!(all.scene[0], Scene::Obstacle);
    Ok(())
}

#[test]
fn missing_files_fail_fast() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();

    let err = AnnotationStore::open(root, Split::Trainval, false).unwrap_err();
    assert!(matches!(err, DatasetError::MissingSplit { .. }));

    write_split(root, "train", &["ghost", "noimg"])?;
    write_record(root, "noimg", &[])?;
    let store = AnnotationStore::open(root, Split::Train, false)?;
    assert!(matches!(
        store.example(0).unwrap_err(),
        DatasetError::AnnotationMissing { .. }
    ));
    assert!(matches!(
        store.example(1).unwrap_err(),
        DatasetError::ImageMissing { .. }
    ));
    assert!(matches!(
        store.example(2).unwrap_err(),
        DatasetError::OutOfRange { index: 2, len: 2 }
    ));
    Ok(())
}

#[test]
fn unknown_label_aborts_loading() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    write_record(
        root,
        "d",
        &[Obj { name: "hydrant", scene: "obstacle", difficult: false, edges: [1, 1, 4, 4] }],
    )?;
    write_image(root, "d", 8, 8)?;
    write_split(root, "train", &["d"])?;
    let store = AnnotationStore::open(root, Split::Train, false)?;
    assert!(matches!(
        store.example(0).unwrap_err(),
        DatasetError::UnknownLabel { ref name, .. } if name == "hydrant"
    ));
    Ok(())
}

#[test]
fn forced_flip_twice_restores_boxes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    two_image_corpus(tmp.path())?;
    let example = AnnotationStore::open(tmp.path(), Split::Train, false)?.example(0)?;
    let t = GeometricTransform::default();

    let once = t.apply_with_flip(&example.image, &example.boxes, &example.labels, true);
    let raw = once.image.mapv(|v| v * 255.0);
    let twice = t.apply_with_flip(&raw, &once.boxes, &once.labels, true);
    assert!((twice.scale - 1.0).abs() < 1e-6);

    let resized = curb_dataset::aug::resize_boxes(&example.boxes, (100, 100), (224, 224));
    for (a, b) in twice.boxes[0].iter().zip(resized[0].iter()) {
        assert!((a - b).abs() < 1e-3);
    }
    Ok(())
}

#[test]
fn seeded_training_flips_vary_by_epoch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    two_image_corpus(tmp.path())?;
    let store = AnnotationStore::open(tmp.path(), Split::Train, false)?;
    let provider = TrainingProvider::new(
        store,
        GeometricTransform::builder().seed(Some(11)).build(),
        Normalizer::default(),
    );

    // Unflipped, image A's box spans x 22.4..112 on the 224-wide output.
    let mut flipped = Vec::new();
    for epoch in 0..24 {
        provider.set_epoch(epoch);
        flipped.push(provider.get(0)?.boxes[0][1] > 100.0);
    }
    assert!(flipped.iter().any(|f| *f), "never flipped: {flipped:?}");
    assert!(flipped.iter().any(|f| !*f), "always flipped: {flipped:?}");

    provider.set_epoch(3);
    let again = provider.get(0)?.boxes[0][1] > 100.0;
    assert_eq!(again, flipped[3]);
    Ok(())
}

#[test]
fn evaluation_and_inference_keep_original_geometry() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    two_image_corpus(root)?;
    write_split(root, "test", &["b", "a"])?;
    write_split(root, "predict", &["a"])?;

    let cfg = DatasetConfig::default();
    let eval = EvaluationProvider::open(root, Split::Test, &cfg)?;
    let first = eval.get(1)?;
    assert_eq!(first.id, "a");
    assert_eq!((first.original_size.height, first.original_size.width), (100, 100));
    assert_eq!(first.boxes, vec![[10.0, 10.0, 50.0, 50.0]]);
    assert_eq!(first.image.dim(), (3, 224, 224));

    let infer = InferenceProvider::open(root, &cfg)?;
    let item = infer.get(0)?;
    assert_eq!(item.id, "a");
    assert_eq!(item.image.dim(), (3, 224, 224));

    let store = AnnotationStore::open(root, Split::Predict, false)?;
    assert!(matches!(store.get(0)?, StoreItem::Unlabeled(ref u) if u.id == "a"));

    let ids: Vec<String> = Prefetcher::sequential(&eval, 2, None)
        .map(|r| r.map(|s| s.id))
        .collect::<Result<_, _>>()?;
    assert_eq!(ids, vec!["b", "a"]);
    Ok(())
}

#[test]
fn holdout_partitions_annotation_ids() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    for i in 0..10 {
        write_record(root, &format!("{i:04}"), &[])?;
    }
    let summary = holdout(root, 0.3, Some(11))?;
    assert_eq!(summary.test.len(), 3);
    assert_eq!(summary.train.len(), 7);

    let train = AnnotationStore::open(root, Split::Train, false)?;
    let test = AnnotationStore::open(root, Split::Test, false)?;
    assert_eq!(train.len() + test.len(), 10);
    assert!(test.ids().iter().all(|id| !train.ids().contains(id)));
    Ok(())
}
