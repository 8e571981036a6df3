pub mod symphonia;
