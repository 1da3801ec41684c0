mod batch_reads;
mod cli;
mod writes;
