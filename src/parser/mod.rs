// Parser module - descriptor loading

pub mod descriptor;

pub use descriptor::{
    load_descriptor_file, parse_descriptor_json, parse_descriptor_yaml, Descriptor, Package,
    Server,
};
