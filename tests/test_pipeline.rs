mod common;
use common::{dir_listing, motion_parameters, synthetic_run, write_matrix, write_text, write_volume, write_volume3};
use fmri_denoise::{
    denoise_run, read_volume, ConfoundTable, DenoiseError, PipelineConfig, RunInputs,
};
use ndarray::Array3;
use std::path::Path;
use tempfile::TempDir;

const DIMS: (usize, usize, usize, usize) = (5, 4, 3, 80);

fn scalar_file(dir: &Path, name: &str, n: usize) -> std::path::PathBuf {
    let text: String = (0..n).map(|i| format!("{:.3}\n", 0.05 * (i % 5) as f64)).collect();
    write_text(dir, name, &text)
}

fn inputs(dir: &Path, n_t_dvars: usize) -> RunInputs {
    let image = write_volume(dir, "sub-01_bold.nii.gz", &synthetic_run(DIMS), 2.0);
    let motion = write_matrix(dir, "sub-01_bold.par", &motion_parameters(DIMS.3));
    let wm = Array3::from_shape_fn((DIMS.0, DIMS.1, DIMS.2), |(x, _, _)| if x < 2 { 1.0 } else { 0.0 });
    let csf = Array3::from_shape_fn((DIMS.0, DIMS.1, DIMS.2), |(x, _, _)| if x == 4 { 1.0 } else { 0.0 });
    RunInputs {
        image,
        motion,
        fd: Some(scalar_file(dir, "fd.txt", DIMS.3)),
        dvars: Some(scalar_file(dir, "dvars.txt", n_t_dvars)),
        compartment_maps: vec![
            write_volume3(dir, "wm.nii.gz", &wm),
            write_volume3(dir, "csf.nii.gz", &csf),
        ],
        slice_regressors: vec![],
        tr: None,
    }
}

#[test]
fn full_run_writes_every_output() {
    let dir = TempDir::new().unwrap();
    let inputs = inputs(dir.path(), DIMS.3);
    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();

    let out = denoise_run(&inputs, &out_dir, &PipelineConfig::default()).unwrap();

    assert_eq!(
        dir_listing(&out_dir),
        vec![
            "all_confounds.tsv",
            "all_confounds_sg.tsv",
            "ext_moco_pars.tsv",
            "new_moco_pars.tsv",
            "sub-01_bold_acompcor.tsv",
            "sub-01_bold_sg.nii.gz",
            "sub-01_bold_sg_betas.nii.gz",
            "sub-01_bold_sg_res.nii.gz",
            "sub-01_bold_sg_rsq.nii.gz",
        ]
    );

    // 30 motion + FD + 5 aCompCor + DVARS.
    let all = ConfoundTable::read_tsv(&out.confounds).unwrap();
    assert_eq!(all.data.dim(), (DIMS.3, 37));
    assert_eq!(all.names[31], "a_comp_cor_00");

    let res = read_volume(&out.nuisance.residuals).unwrap();
    assert_eq!(res.dims(), DIMS);
    let betas = read_volume(&out.nuisance.betas).unwrap();
    assert_eq!(betas.dims(), (DIMS.0, DIMS.1, DIMS.2, 38));
    assert!(res.data.iter().all(|v| v.is_finite()));
}

#[test]
fn filtering_can_be_switched_off() {
    let dir = TempDir::new().unwrap();
    let inputs = inputs(dir.path(), DIMS.3);
    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();

    let cfg = PipelineConfig {
        filter_image: false,
        filter_confounds: false,
        ..PipelineConfig::default()
    };
    let out = denoise_run(&inputs, &out_dir, &cfg).unwrap();
    assert!(out.filtered_image.is_none());
    assert!(out.filtered_confounds.is_none());
    assert_eq!(out.nuisance.residuals, out_dir.join("sub-01_bold_res.nii.gz"));
    assert!(!out_dir.join("sub-01_bold_sg.nii.gz").exists());
}

#[test]
fn misaligned_confounds_leave_out_dir_empty() {
    let dir = TempDir::new().unwrap();
    let inputs = inputs(dir.path(), DIMS.3 - 1);
    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();

    let err = denoise_run(&inputs, &out_dir, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DenoiseError>(),
        Some(DenoiseError::ConfoundAlignment { .. })
    ));
    assert!(dir_listing(&out_dir).is_empty());
}

#[test]
fn config_file_drives_the_run() {
    let dir = TempDir::new().unwrap();
    let inputs = inputs(dir.path(), DIMS.3);
    let cfg_path = write_text(
        dir.path(),
        "cfg.json",
        r#"{ "filter_confounds": false,
             "nuisance": { "num_components": 6, "method": "PCA", "n_threads": 2 } }"#,
    );
    let cfg = PipelineConfig::from_json_file(&cfg_path).unwrap();
    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();

    let out = denoise_run(&inputs, &out_dir, &cfg).unwrap();
    let betas = read_volume(&out.nuisance.betas).unwrap();
    assert_eq!(betas.dims(), (DIMS.0, DIMS.1, DIMS.2, 6));
}

#[test]
fn missing_first_fd_sample_only_blanks_that_row() {
    let dir = TempDir::new().unwrap();
    let mut inputs = inputs(dir.path(), DIMS.3);
    let fd: String = std::iter::once("framewise_displacement\nn/a\n".to_string())
        .chain((1..DIMS.3).map(|i| format!("{:.3}\n", 0.05 * (i % 5) as f64)))
        .collect();
    inputs.fd = Some(write_text(dir.path(), "fd_na.txt", &fd));
    let out_dir = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();

    let out = denoise_run(&inputs, &out_dir, &PipelineConfig::default()).unwrap();
    let filtered = ConfoundTable::read_tsv(out.filtered_confounds.as_ref().unwrap()).unwrap();
    let fd = filtered.column("framewise_displacement").unwrap();
    assert_eq!(fd.len(), DIMS.3);
    assert!(fd[0].is_nan());
    assert!(fd.iter().skip(1).all(|v| v.is_finite()));

    let res = read_volume(&out.nuisance.residuals).unwrap();
    assert!(res.data.iter().all(|v| v.is_finite()));
}
