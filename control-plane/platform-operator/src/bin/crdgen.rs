use kube::core::CustomResourceExt;
use platform_models::{Module, Platform};

fn main() {
    for (i, crd) in [Platform::crd(), Module::crd()].iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        let yaml = serde_yaml::to_string(crd).expect("serialize CRD to YAML");
        print!("{yaml}");
    }
}
